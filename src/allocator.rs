//! Greedy top-k allocation over per-user score rows, plus the bid simulation
//! and ranked-line output around it.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_BID_SEEDS: [u64; 5] = [0, 3, 4, 5, 6];
pub const BID_SHAPE: u32 = 20;
pub const BID_RATE: f64 = 0.4;

/// Higher score wins; equal scores go to the lower item index.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    index: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Indices of the `k` best entries of `row`, best first.
pub fn top_k(row: &[f64], k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    // min-heap holding the current k best
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
    for (index, &score) in row.iter().enumerate() {
        let cand = Candidate { score, index };
        if heap.len() < k {
            heap.push(Reverse(cand));
        } else if let Some(Reverse(worst)) = heap.peek() {
            if cand > *worst {
                heap.pop();
                heap.push(Reverse(cand));
            }
        }
    }
    // ascending Reverse order == descending candidate order
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(c)| c.index)
        .collect()
}

/// Per-user top-`k` over a flat `user_count x item_num` score matrix. The
/// result is flat too: `k` item indices per user, best first.
pub fn allocate(scores: &[f64], user_count: usize, item_num: usize, k: usize) -> Result<Vec<usize>> {
    if k > item_num {
        return Err(Error::TopKTooLarge { k, item_num });
    }
    if scores.len() != user_count * item_num {
        return Err(Error::ScoreShape {
            len: scores.len(),
            user_count,
            item_num,
        });
    }
    let mut out = Vec::with_capacity(user_count * k);
    if item_num == 0 {
        return Ok(out);
    }
    for row in scores.chunks_exact(item_num) {
        out.extend(top_k(row, k));
    }
    Ok(out)
}

/// Multiply every user row by the bid vector.
pub fn weight_scores(scores: &[f64], bids: &[f64]) -> Result<Vec<f64>> {
    let item_num = bids.len();
    if item_num == 0 || scores.len() % item_num != 0 {
        return Err(Error::ScoreShape {
            len: scores.len(),
            user_count: scores.len() / item_num.max(1),
            item_num,
        });
    }
    Ok(scores
        .chunks_exact(item_num)
        .flat_map(|row| row.iter().zip(bids).map(|(s, b)| s * b))
        .collect())
}

/// `item_id:bid` tokens, bids to four decimals.
pub fn format_ranked_line(indices: &[usize], bids: &[f64]) -> Result<String> {
    let tokens = indices
        .iter()
        .map(|&ad| -> Result<String> {
            let bid = bids.get(ad).ok_or(Error::BidShape {
                len: bids.len(),
                item_num: ad + 1,
            })?;
            Ok(format!("{ad}:{bid:.4}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(tokens.join(" "))
}

/// Simulated bid vectors, one per seed. Each bid is a Gamma(shape 20,
/// rate 0.4) draw, taken as the sum of 20 exponential draws.
pub struct BidSimulator {
    seeds: Vec<u64>,
}

impl Default for BidSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_BID_SEEDS.to_vec())
    }
}

impl BidSimulator {
    pub fn new(seeds: Vec<u64>) -> Self {
        Self { seeds }
    }

    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    pub fn bids(&self, item_num: usize) -> Vec<Vec<f64>> {
        self.seeds
            .iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..item_num).map(|_| erlang(&mut rng, BID_SHAPE, BID_RATE)).collect()
            })
            .collect()
    }
}

fn erlang<R: Rng + ?Sized>(rng: &mut R, shape: u32, rate: f64) -> f64 {
    (0..shape)
        .map(|_| {
            // (0, 1] keeps ln finite
            let u: f64 = 1.0 - rng.gen::<f64>();
            -u.ln()
        })
        .sum::<f64>()
        / rate
}

/// One append-mode output file per bid variant.
pub struct RankingSink {
    paths: Vec<PathBuf>,
    writers: Vec<BufWriter<File>>,
}

impl RankingSink {
    /// Opens `<dir>/pred.<variant>` for each variant, appending.
    pub fn open(dir: impl AsRef<Path>, variants: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let paths: Vec<PathBuf> = (0..variants).map(|j| dir.join(format!("pred.{j}"))).collect();
        let writers = paths
            .iter()
            .map(|p| -> Result<BufWriter<File>> {
                let f = OpenOptions::new().create(true).append(true).open(p)?;
                Ok(BufWriter::new(f))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { paths, writers })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn variants(&self) -> usize {
        self.writers.len()
    }

    /// Allocate each user of `scores` under bid variant `variant` and append
    /// one ranked line per user.
    pub fn write_users(&mut self, variant: usize, scores: &[f64], bids: &[f64], k: usize) -> Result<usize> {
        let sinks = self.writers.len();
        let out = self.writers.get_mut(variant).ok_or(Error::VariantMismatch {
            bids: variant + 1,
            sinks,
        })?;
        let item_num = bids.len();
        let weighted = weight_scores(scores, bids)?;
        let user_count = weighted.len() / item_num;
        let picks = allocate(&weighted, user_count, item_num, k)?;
        if k > 0 {
            for user in picks.chunks_exact(k) {
                writeln!(out, "{}", format_ranked_line(user, bids)?)?;
            }
        } else {
            for _ in 0..user_count {
                writeln!(out)?;
            }
        }
        Ok(user_count)
    }

    pub fn flush(&mut self) -> Result<()> {
        for w in &mut self.writers {
            w.flush()?;
        }
        Ok(())
    }
}
