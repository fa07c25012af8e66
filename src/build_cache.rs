//! Build the position store for one or more log variants
//!
//! Usage:
//!   cargo run --release --bin build_cache -- <dataset_dir> --prefix tr --prefix va

use anyhow::{Context, Result};
use clap::Parser;
use posbias::builder::{CacheBuilder, DEFAULT_FLUSH_EVERY};
use posbias::{DatasetPaths, PositionDataset, Store};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "build_cache", about = "Convert .svm impression logs into position stores")]
struct Cli {
    /// Directory holding item.svm and <prefix>.svm
    dataset_dir: PathBuf,

    /// Log variants to build (tr, va, trva, gt, ...)
    #[arg(long = "prefix", default_value = "tr")]
    prefixes: Vec<String>,

    /// Keep an existing committed store instead of rebuilding it
    #[arg(long)]
    if_missing: bool,

    /// Records buffered between flushes
    #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    flush_every: usize,
}

fn main() -> Result<()> {
    posbias::init_tracing();
    let cli = Cli::parse();
    let builder = CacheBuilder::new(cli.flush_every);

    println!("=== Position Store Builder ===");
    println!("Dataset: {}", cli.dataset_dir.display());

    let total = cli.prefixes.len();
    for (i, prefix) in cli.prefixes.iter().enumerate() {
        let paths = DatasetPaths::resolve(&cli.dataset_dir, prefix);
        println!("\n[{}/{}] {}", i + 1, total, prefix);

        if cli.if_missing {
            if let Ok(store) = Store::open(&paths.store) {
                let meta = store.metadata();
                println!("  Store exists, skipping (max_dim={}, item_num={})", meta.max_dim, meta.item_num);
                continue;
            }
        }

        let start = Instant::now();
        Store::discard(&paths.store).with_context(|| format!("discard {}", paths.store.display()))?;
        let meta = builder
            .build(&paths.raw_log, &paths.item_log, &paths.store)
            .with_context(|| format!("build {}", paths.store.display()))?;
        let dataset = PositionDataset::from_store(Store::open(&paths.store)?, false, None);

        println!("  Raw log:  {}", paths.raw_log.display());
        println!("  Items:    {}", paths.item_log.display());
        println!("  Store:    {}", paths.store.display());
        println!("  max_dim:  {} (embedding rows {})", meta.max_dim, meta.max_dim + 1);
        println!("  item_num: {}", meta.item_num);
        println!("  samples:  {}", dataset.samples());
        println!("  Built in {:.2?}", start.elapsed());
    }

    Ok(())
}
