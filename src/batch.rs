//! Batching of dataset samples into padded, model-ready matrices.

use crate::dataset::{PositionDataset, Sample};
use crate::error::Result;
use rand::seq::SliceRandom;
use rand::Rng;

/// Padding id, never a real feature.
pub const PAD: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Separate `context` and `item` matrices.
    Split,
    /// A single `item ++ context` row per sample in `context`; `item` is empty.
    Joint,
}

/// Row-major padded batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub rows: usize,
    pub context: Vec<i32>,
    pub context_width: usize,
    pub item: Vec<i32>,
    pub item_width: usize,
    /// Click flags; `-1.0` where the sample has no label.
    pub labels: Vec<f32>,
    pub positions: Vec<u8>,
    pub item_ids: Vec<i32>,
}

impl Batch {
    pub fn context_row(&self, row: usize) -> &[i32] {
        &self.context[row * self.context_width..(row + 1) * self.context_width]
    }

    pub fn item_row(&self, row: usize) -> &[i32] {
        &self.item[row * self.item_width..(row + 1) * self.item_width]
    }
}

fn pad_rows<'a>(rows: impl Iterator<Item = &'a [i32]> + Clone) -> (Vec<i32>, usize) {
    let width = rows.clone().map(<[i32]>::len).max().unwrap_or(0);
    let mut out = Vec::new();
    for row in rows {
        out.extend_from_slice(row);
        out.resize(out.len() + width - row.len(), PAD);
    }
    (out, width)
}

pub fn collate(samples: &[Sample], layout: Layout) -> Batch {
    let (context, context_width, item, item_width) = match layout {
        Layout::Split => {
            let (context, cw) = pad_rows(samples.iter().map(|s| s.context.as_slice()));
            let (item, iw) = pad_rows(samples.iter().map(|s| s.item.as_slice()));
            (context, cw, item, iw)
        }
        Layout::Joint => {
            let joined: Vec<Vec<i32>> = samples
                .iter()
                .map(|s| s.item.iter().chain(&s.context).copied().collect())
                .collect();
            let (context, cw) = pad_rows(joined.iter().map(Vec::as_slice));
            (context, cw, Vec::new(), 0)
        }
    };
    Batch {
        rows: samples.len(),
        context,
        context_width,
        item,
        item_width,
        labels: samples
            .iter()
            .map(|s| s.label.map_or(-1.0, |l| l as f32))
            .collect(),
        positions: samples.iter().map(|s| s.position).collect(),
        item_ids: samples.iter().map(|s| s.item_id).collect(),
    }
}

pub fn sequential(len: u64) -> Vec<u64> {
    (0..len).collect()
}

pub fn shuffled<R: Rng + ?Sized>(len: u64, rng: &mut R) -> Vec<u64> {
    let mut order = sequential(len);
    order.shuffle(rng);
    order
}

/// Largest multiple of `item_num` not above `batch_size`, and never less than
/// one full user.
pub fn eval_batch_size(batch_size: usize, item_num: usize) -> usize {
    if item_num == 0 {
        return batch_size.max(1);
    }
    (batch_size / item_num).max(1) * item_num
}

/// Walks a dataset in a fixed index order.
pub struct Batches<'a> {
    dataset: &'a PositionDataset,
    order: Vec<u64>,
    batch_size: usize,
    layout: Layout,
    next: usize,
}

impl<'a> Batches<'a> {
    pub fn new(dataset: &'a PositionDataset, order: Vec<u64>, batch_size: usize, layout: Layout) -> Self {
        Self {
            dataset,
            order,
            batch_size: batch_size.max(1),
            layout,
            next: 0,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.order.len() {
            return None;
        }
        let end = (self.next + self.batch_size).min(self.order.len());
        let samples = self.order[self.next..end]
            .iter()
            .map(|&idx| self.dataset.get(idx))
            .collect::<Result<Vec<_>>>();
        self.next = end;
        Some(samples.map(|s| collate(&s, self.layout)))
    }
}
