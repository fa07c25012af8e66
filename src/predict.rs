//! Full-catalog ranking: score every (impression, item) pair of an evaluation
//! view and allocate the top slots per impression under each bid vector.

use crate::allocator::RankingSink;
use crate::batch::{eval_batch_size, sequential, Batch, Batches, Layout};
use crate::dataset::{Indexing, PositionDataset};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Slots filled per ranked line.
pub const RANKED_SLOTS: usize = 10;

/// An opaque click model: one probability in `[0, 1]` per batch row.
pub trait Scorer {
    fn score(&mut self, batch: &Batch) -> Result<Vec<f32>>;
}

impl<F> Scorer for F
where
    F: FnMut(&Batch) -> Result<Vec<f32>>,
{
    fn score(&mut self, batch: &Batch) -> Result<Vec<f32>> {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredictSummary {
    pub users: usize,
    pub batches: usize,
}

pub struct Predictor {
    pub batch_size: usize,
    pub layout: Layout,
    pub k: usize,
}

impl Default for Predictor {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            layout: Layout::Split,
            k: RANKED_SLOTS,
        }
    }
}

impl Predictor {
    pub fn run(
        &self,
        dataset: &PositionDataset,
        scorer: &mut dyn Scorer,
        bids: &[Vec<f64>],
        sink: &mut RankingSink,
    ) -> Result<PredictSummary> {
        let Indexing::Eval { item_num } = dataset.indexing() else {
            return Err(Error::NotEvalView);
        };
        let item_num = item_num as usize;
        if bids.len() != sink.variants() {
            return Err(Error::VariantMismatch {
                bids: bids.len(),
                sinks: sink.variants(),
            });
        }
        if let Some(b) = bids.iter().find(|b| b.len() != item_num) {
            return Err(Error::BidShape {
                len: b.len(),
                item_num,
            });
        }

        let batch_size = eval_batch_size(self.batch_size, item_num);
        info!(batch_size, item_num, variants = bids.len(), "ranking evaluation view");

        let mut summary = PredictSummary::default();
        for batch in Batches::new(dataset, sequential(dataset.len()), batch_size, self.layout) {
            let batch = batch?;
            let probs = scorer.score(&batch)?;
            if probs.len() != batch.rows {
                return Err(Error::ScoreShape {
                    len: probs.len(),
                    user_count: batch.rows / item_num.max(1),
                    item_num,
                });
            }
            let scores: Vec<f64> = probs.into_iter().map(f64::from).collect();
            let mut users = 0;
            for (variant, b) in bids.iter().enumerate() {
                users = sink.write_users(variant, &scores, b, self.k)?;
            }
            summary.users += users;
            summary.batches += 1;
            debug!(batch = summary.batches, users = summary.users, "batch ranked");
        }
        sink.flush()?;
        info!(users = summary.users, batches = summary.batches, "ranking complete");
        Ok(summary)
    }
}
