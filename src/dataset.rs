//! Random-access view over a built store.
//!
//! Training and validation views expose one logical entry per displayed slot
//! (`10 x samples`); evaluation views pair every impression context with every
//! item (`item_num x samples`) for full-catalog ranking.

use crate::builder::CacheBuilder;
use crate::codec::{decode_item, decode_sample, decode_sample_ints, encode_index, item_key, SLOTS};
use crate::error::{Error, Result};
use crate::store::{Metadata, Store};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Evaluation views keep the record from this integer on, i.e. everything
/// after the first slot pair.
pub const EVAL_CONTEXT_OFFSET: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetOptions {
    /// Log variant: `tr`, `va`, `trva`, `gt`, ...
    pub prefix: String,
    /// Discard and rebuild the store even if one exists.
    pub rebuild: bool,
    /// Drop context ids above this bound. Only applied when > 0.
    pub max_context_dim: Option<i32>,
    /// Enumerate every item per impression instead of the displayed slots.
    pub eval: bool,
    pub flush_every: usize,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            prefix: "tr".to_string(),
            rebuild: false,
            max_context_dim: None,
            eval: false,
            flush_every: crate::builder::DEFAULT_FLUSH_EVERY,
        }
    }
}

impl DatasetOptions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// File locations for one log variant inside a dataset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub raw_log: PathBuf,
    pub item_log: PathBuf,
    pub store: PathBuf,
}

impl DatasetPaths {
    /// Prefers plain `.svm` logs and falls back to `.svm.gz`.
    pub fn resolve(dir: &Path, prefix: &str) -> Self {
        let pick = |stem: &str| {
            let plain = dir.join(format!("{stem}.svm"));
            let gz = dir.join(format!("{stem}.svm.gz"));
            if !plain.exists() && gz.exists() {
                gz
            } else {
                plain
            }
        };
        Self {
            raw_log: pick(prefix),
            item_log: pick("item"),
            store: dir.join(format!("{prefix}.store")),
        }
    }
}

/// Maps a logical dataset index to `(sample_index, slot_or_item)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    /// One entry per displayed slot; the second component is the slot.
    Train,
    /// One entry per (impression, item); the second component is the item id.
    Eval { item_num: u32 },
}

impl Indexing {
    pub fn len(&self, samples: u64) -> u64 {
        match self {
            Indexing::Train => SLOTS as u64 * samples,
            Indexing::Eval { item_num } => *item_num as u64 * samples,
        }
    }

    /// Callers must keep `idx` below [`Indexing::len`].
    pub fn resolve(&self, idx: u64) -> (u32, u32) {
        let per_sample = match self {
            Indexing::Train => SLOTS as u64,
            Indexing::Eval { item_num } => *item_num as u64,
        };
        ((idx / per_sample) as u32, (idx % per_sample) as u32)
    }
}

/// A record as read from the store, before filtering and labelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub context: Vec<i32>,
    pub item: Vec<i32>,
    pub label: Option<i32>,
    /// 0-based display slot, if the record came from one.
    pub slot: Option<u32>,
    pub item_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub context: Vec<i32>,
    pub item: Vec<i32>,
    /// Click flag; `None` in evaluation views.
    pub label: Option<i32>,
    /// 1..=10 for a displayed slot, 0 for no position.
    pub position: u8,
    pub item_id: i32,
}

/// Apply the context ceiling and turn the slot into a 1-based position.
pub fn filter_and_label(raw: RawRecord, ceiling: Option<i32>) -> Sample {
    let mut context = raw.context;
    if let Some(max) = ceiling.filter(|&d| d > 0) {
        context.retain(|&id| id <= max);
    }
    Sample {
        context,
        item: raw.item,
        label: raw.label,
        position: raw.slot.map_or(0, |s| s as u8 + 1),
        item_id: raw.item_id,
    }
}

pub struct PositionDataset {
    store: Store,
    meta: Metadata,
    samples: u64,
    indexing: Indexing,
    ceiling: Option<i32>,
}

impl PositionDataset {
    /// Open the view for `opts.prefix` inside `dir`, building the store first
    /// when asked to or when no committed store exists.
    pub fn open(dir: impl AsRef<Path>, opts: &DatasetOptions) -> Result<Self> {
        let paths = DatasetPaths::resolve(dir.as_ref(), &opts.prefix);
        if !paths.raw_log.is_file() {
            return Err(Error::MissingInput {
                path: paths.raw_log,
            });
        }

        let builder = CacheBuilder::new(opts.flush_every);
        let rebuild = |paths: &DatasetPaths| -> Result<Store> {
            Store::discard(&paths.store)?;
            builder.build(&paths.raw_log, &paths.item_log, &paths.store)?;
            Store::open(&paths.store)
        };

        let store = if opts.rebuild {
            rebuild(&paths)?
        } else {
            match Store::open(&paths.store) {
                Ok(store) => store,
                Err(Error::NotBuilt { path }) => {
                    if path.exists() {
                        warn!(path = %path.display(), "store has no metadata, rebuilding");
                    }
                    rebuild(&paths)?
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Self::from_store(store, opts.eval, opts.max_context_dim))
    }

    pub fn from_store(store: Store, eval: bool, max_context_dim: Option<i32>) -> Self {
        let meta = store.metadata();
        let item_num = meta.item_num.max(0) as u64;
        let samples = (store.entries() as u64).saturating_sub(item_num + 2);
        let indexing = if eval {
            Indexing::Eval {
                item_num: item_num as u32,
            }
        } else {
            Indexing::Train
        };
        info!(
            path = %store.path().display(),
            samples,
            item_num,
            max_dim = meta.max_dim,
            ?indexing,
            "reading position dataset"
        );
        Self {
            store,
            meta,
            samples,
            indexing,
            ceiling: max_context_dim,
        }
    }

    /// Embedding table size: largest stored id plus the padding id 0.
    pub fn max_dim(&self) -> i32 {
        self.meta.max_dim + 1
    }

    /// Ceiling to hand to a paired validation or evaluation view.
    pub fn context_ceiling(&self) -> i32 {
        self.meta.max_dim
    }

    pub fn item_num(&self) -> usize {
        self.meta.item_num.max(0) as usize
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn indexing(&self) -> Indexing {
        self.indexing
    }

    pub fn len(&self) -> u64 {
        self.indexing.len(self.samples)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: u64) -> Result<Sample> {
        let len = self.len();
        if idx >= len {
            return Err(Error::IndexOutOfRange { index: idx, len });
        }
        let (sample_index, sub) = self.indexing.resolve(idx);
        let bytes = self
            .store
            .get(&encode_index(sample_index))
            .ok_or_else(|| Error::MissingRecord {
                key: format!("sample {sample_index}"),
            })?;

        let raw = match self.indexing {
            Indexing::Train => {
                let rec = decode_sample(bytes)?;
                let (item_id, flag) = rec.slots[sub as usize];
                RawRecord {
                    context: rec.context,
                    item: self.item(item_id)?,
                    label: Some(flag),
                    slot: Some(sub),
                    item_id,
                }
            }
            Indexing::Eval { .. } => {
                let ints = decode_sample_ints(bytes)?;
                let item_id = sub as i32;
                RawRecord {
                    context: ints[EVAL_CONTEXT_OFFSET..].to_vec(),
                    item: self.item(item_id)?,
                    label: None,
                    slot: None,
                    item_id,
                }
            }
        };
        Ok(filter_and_label(raw, self.ceiling))
    }

    fn item(&self, item_id: i32) -> Result<Vec<i32>> {
        let missing = || Error::MissingRecord {
            key: format!("item_{item_id}"),
        };
        let id = u32::try_from(item_id).map_err(|_| missing())?;
        let bytes = self.store.get(&item_key(id)).ok_or_else(missing)?;
        decode_item(bytes)
    }
}
