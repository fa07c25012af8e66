//! Position-biased impression cache and greedy top-k allocation.
//!
//! Raw impression logs are converted once into a memory-mapped FST-indexed
//! store ([`builder`], [`store`]) and read back through [`PositionDataset`]
//! either one displayed slot at a time (training) or one catalog item at a
//! time (evaluation). Model scores over an evaluation view are turned into
//! ranked slates by [`allocator::allocate`].

pub mod allocator;
pub mod batch;
pub mod builder;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod predict;
pub mod store;

pub use allocator::{allocate, BidSimulator, RankingSink};
pub use builder::{build, CacheBuilder};
pub use dataset::{DatasetOptions, DatasetPaths, Indexing, PositionDataset, Sample};
pub use error::{Error, Result};
pub use store::{Metadata, Store};

/// Install the `tracing` subscriber used by the command-line tools.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
