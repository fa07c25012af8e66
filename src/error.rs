use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{} does not exist", path.display())]
    MissingInput { path: PathBuf },

    #[error("{}:{line}: {reason}", path.display())]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("malformed record of {len} bytes: {reason}")]
    MalformedRecord { len: usize, reason: &'static str },

    #[error("{}:{line}: item {item_id} is outside the item table of {item_num}", path.display())]
    UnknownItem {
        path: PathBuf,
        line: usize,
        item_id: i32,
        item_num: usize,
    },

    #[error("store at {} is not built", path.display())]
    NotBuilt { path: PathBuf },

    #[error("record {key} is missing from the store")]
    MissingRecord { key: String },

    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("record of {len} bytes at offset {offset} does not fit the store index")]
    RecordTooLarge { offset: u64, len: usize },

    #[error("k={k} exceeds the {item_num} candidates per user")]
    TopKTooLarge { k: usize, item_num: usize },

    #[error("score array of length {len} is not {user_count} users x {item_num} items")]
    ScoreShape {
        len: usize,
        user_count: usize,
        item_num: usize,
    },

    #[error("bid vector of length {len} does not cover {item_num} items")]
    BidShape { len: usize, item_num: usize },

    #[error("{bids} bid vectors for {sinks} output streams")]
    VariantMismatch { bids: usize, sinks: usize },

    #[error("ranking needs an evaluation-mode dataset")]
    NotEvalView,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fst(#[from] fst::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
