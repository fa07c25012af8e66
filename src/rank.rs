//! Greedy top-k ranking of a score dump under simulated bids
//!
//! The score file holds one line per user with one probability per item,
//! whitespace-separated. One output file per bid seed is appended to.
//!
//! Usage:
//!   cargo run --release --bin rank -- <scores.txt[.gz]> [--k 10] [--seed 0 --seed 3] [--out-dir preds]

use anyhow::{Context, Result};
use clap::Parser;
use posbias::allocator::DEFAULT_BID_SEEDS;
use posbias::builder::open_log;
use posbias::predict::RANKED_SLOTS;
use posbias::{BidSimulator, RankingSink};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "rank", about = "Allocate top-k items per user from a score dump")]
struct Cli {
    /// One line per user, item_num scores per line
    scores: PathBuf,

    #[arg(long, default_value_t = RANKED_SLOTS)]
    k: usize,

    /// Bid simulation seeds, one output file each
    #[arg(long = "seed")]
    seeds: Vec<u64>,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Users allocated per chunk
    #[arg(long, default_value_t = 1024)]
    chunk: usize,
}

fn main() -> Result<()> {
    posbias::init_tracing();
    let cli = Cli::parse();
    let seeds = if cli.seeds.is_empty() {
        DEFAULT_BID_SEEDS.to_vec()
    } else {
        cli.seeds.clone()
    };

    println!("=== Greedy Top-K Ranking ===");
    println!("Scores: {}", cli.scores.display());
    println!("k: {}", cli.k);
    println!("Seeds: {:?}", seeds);

    let start = Instant::now();
    let reader = open_log(&cli.scores)?;
    let simulator = BidSimulator::new(seeds);
    let mut sink = RankingSink::open(&cli.out_dir, simulator.seeds().len())?;

    let mut bids: Vec<Vec<f64>> = Vec::new();
    let mut item_num = 0usize;
    let mut chunk: Vec<f64> = Vec::new();
    let mut users = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let row = line
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: bad score", cli.scores.display(), lineno + 1))?;

        if bids.is_empty() {
            item_num = row.len();
            anyhow::ensure!(item_num > 0, "first score line is empty");
            bids = simulator.bids(item_num);
            println!("Items per user: {}", item_num);
        }
        anyhow::ensure!(
            row.len() == item_num,
            "{}:{}: expected {} scores, found {}",
            cli.scores.display(),
            lineno + 1,
            item_num,
            row.len()
        );

        chunk.extend(row);
        if chunk.len() >= cli.chunk.max(1) * item_num {
            users += flush_chunk(&mut sink, &chunk, &bids, cli.k)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        users += flush_chunk(&mut sink, &chunk, &bids, cli.k)?;
    }
    sink.flush()?;

    println!("\nRanked {} users in {:.2?}", users, start.elapsed());
    for path in sink.paths() {
        println!("  {}", path.display());
    }
    Ok(())
}

fn flush_chunk(sink: &mut RankingSink, scores: &[f64], bids: &[Vec<f64>], k: usize) -> Result<usize> {
    let mut users = 0;
    for (variant, b) in bids.iter().enumerate() {
        users = sink.write_users(variant, scores, b, k)?;
    }
    Ok(users)
}
