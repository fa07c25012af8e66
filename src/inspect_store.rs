//! Print and spot-check a position dataset view
//!
//! Usage:
//!   cargo run --release --bin inspect_store -- <dataset_dir> [--prefix gt] [--eval] [--check N]

use anyhow::{Context, Result};
use clap::Parser;
use posbias::dataset::Indexing;
use posbias::{DatasetOptions, PositionDataset};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inspect_store", about = "Show metadata and records of a position dataset")]
struct Cli {
    /// Directory holding item.svm and <prefix>.svm
    dataset_dir: PathBuf,

    /// JSON file with dataset options; flags below override it
    #[arg(long)]
    options: Option<PathBuf>,

    #[arg(long)]
    prefix: Option<String>,

    /// Enumerate every item per impression
    #[arg(long)]
    eval: bool,

    /// Drop context ids above this bound
    #[arg(long)]
    ceiling: Option<i32>,

    /// Records to print from the start of the view
    #[arg(long, default_value_t = 3)]
    show: u64,

    /// Random indices to verify
    #[arg(long, default_value_t = 0)]
    check: usize,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() -> Result<()> {
    posbias::init_tracing();
    let cli = Cli::parse();

    let mut opts = match &cli.options {
        Some(p) => DatasetOptions::from_json_file(p).with_context(|| format!("load {}", p.display()))?,
        None => DatasetOptions::default(),
    };
    if let Some(prefix) = cli.prefix {
        opts.prefix = prefix;
    }
    opts.eval |= cli.eval;
    if cli.ceiling.is_some() {
        opts.max_context_dim = cli.ceiling;
    }

    let dataset = PositionDataset::open(&cli.dataset_dir, &opts)
        .with_context(|| format!("open {} in {}", opts.prefix, cli.dataset_dir.display()))?;

    println!("=== {} ===", opts.prefix);
    println!("Mode:     {:?}", dataset.indexing());
    println!("max_dim:  {}", dataset.max_dim());
    println!("item_num: {}", dataset.item_num());
    println!("samples:  {}", dataset.samples());
    println!("length:   {}", dataset.len());

    println!("\n=== First records ===");
    for idx in 0..cli.show.min(dataset.len()) {
        let s = dataset.get(idx)?;
        println!(
            "  {idx}: item_id={} label={:?} pos={} item={:?} context={:?}",
            s.item_id, s.label, s.position, s.item, s.context
        );
    }

    if cli.check == 0 || dataset.is_empty() {
        return Ok(());
    }

    println!("\nChecking {} random indices...", cli.check);
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut passed = 0;
    let mut failed = 0;

    for _ in 0..cli.check {
        let idx = rng.gen_range(0..dataset.len());
        let a = dataset.get(idx)?;
        let b = dataset.get(idx)?;

        let expected_position = match dataset.indexing() {
            Indexing::Train => (idx % 10) as u8 + 1,
            Indexing::Eval { .. } => 0,
        };
        let expected_item = match dataset.indexing() {
            Indexing::Train => a.item_id,
            Indexing::Eval { item_num } => (idx % item_num as u64) as i32,
        };
        let over_ceiling = opts
            .max_context_dim
            .filter(|&d| d > 0)
            .and_then(|d| a.context.iter().find(|&&id| id > d));

        if a != b {
            println!("FAIL: idx={idx} not deterministic");
            failed += 1;
        } else if a.position != expected_position {
            println!("FAIL: idx={idx} position={} expected {expected_position}", a.position);
            failed += 1;
        } else if a.item_id != expected_item {
            println!("FAIL: idx={idx} item_id={} expected {expected_item}", a.item_id);
            failed += 1;
        } else if let Some(id) = over_ceiling {
            println!("FAIL: idx={idx} context id {id} above ceiling");
            failed += 1;
        } else {
            passed += 1;
        }
    }

    println!("\nResults: {passed} passed, {failed} failed");
    if failed > 0 {
        anyhow::bail!("store check failed with {failed} errors");
    }
    Ok(())
}
