//! One-shot cache build: raw text logs in, committed store out.
//!
//! Raw impression line: `item0[:flag0],...,item9[:flag9] f1:v1 f2:v2 ...`
//! Item line (line number = item id): `f1:v1 f2:v2 ...`
//!
//! Feature values are dropped, only ids are kept, sorted ascending. Any
//! malformed line aborts the whole build.

use crate::codec::{encode_index, encode_item, encode_sample, item_key, SlotPairs, SLOTS};
use crate::error::{Error, Result};
use crate::store::{Metadata, StoreWriter};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

pub const DEFAULT_FLUSH_EVERY: usize = 100_000;

/// Open a log for line streaming, decompressing `.gz` files on the fly.
pub fn open_log(path: &Path) -> Result<Box<dyn BufRead>> {
    if !path.is_file() {
        return Err(Error::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::with_capacity(1 << 20, GzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(1 << 20, file))
    };
    Ok(reader)
}

fn parse_int(s: &str) -> std::result::Result<i32, String> {
    s.trim()
        .parse::<i32>()
        .map_err(|e| format!("bad integer {s:?}: {e}"))
}

/// Sorted feature ids of a `f1:v1 f2:v2 ...` token list.
pub fn parse_features(spec: &str) -> std::result::Result<Vec<i32>, String> {
    let mut ids = Vec::new();
    for token in spec.split_whitespace() {
        let id_part = token.split(':').next().unwrap_or(token);
        let id = parse_int(id_part)?;
        if id < 1 {
            return Err(format!("feature id {id} is reserved"));
        }
        ids.push(id);
    }
    if ids.is_empty() {
        return Err("no feature tokens".to_string());
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Exactly [`SLOTS`] `item[:flag]` entries; a bare item id means a click.
pub fn parse_labels(spec: &str) -> std::result::Result<SlotPairs, String> {
    let entries: Vec<&str> = spec.split(',').collect();
    if entries.len() != SLOTS {
        return Err(format!(
            "expected {SLOTS} slot labels, found {}",
            entries.len()
        ));
    }
    let mut slots = [(0, 0); SLOTS];
    for (slot, entry) in slots.iter_mut().zip(entries) {
        let mut parts = entry.split(':');
        let item_id = parse_int(parts.next().unwrap_or(entry))?;
        let flag = match parts.next() {
            Some(f) => parse_int(f)?,
            None => 1,
        };
        *slot = (item_id, flag);
    }
    Ok(slots)
}

pub fn parse_impression(line: &str) -> std::result::Result<(SlotPairs, Vec<i32>), String> {
    let line = line.trim();
    let (labels, context) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| "missing context features".to_string())?;
    Ok((parse_labels(labels)?, parse_features(context)?))
}

pub struct CacheBuilder {
    flush_every: usize,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self {
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

impl CacheBuilder {
    pub fn new(flush_every: usize) -> Self {
        Self {
            flush_every: flush_every.max(1),
        }
    }

    /// Build the store at `store_path` from scratch. Nothing is readable at
    /// `store_path` until every record is written; on error the partial build
    /// is removed.
    pub fn build(&self, raw_log: &Path, item_log: &Path, store_path: &Path) -> Result<Metadata> {
        let raw = open_log(raw_log)?;
        let items = open_log(item_log)?;
        let mut writer = StoreWriter::create(store_path, self.flush_every)?;

        info!(path = %item_log.display(), "loading item features");
        let mut item_num = 0usize;
        for (lineno, line) in items.lines().enumerate() {
            let line = line?;
            let feats = parse_features(&line).map_err(|reason| Error::MalformedLine {
                path: item_log.to_path_buf(),
                line: lineno + 1,
                reason,
            })?;
            writer.put(&item_key(item_num as u32), &encode_item(&feats))?;
            item_num += 1;
        }
        info!(item_num, "item records written");

        info!(path = %raw_log.display(), "loading impressions");
        let mut max_dim = 0i32;
        let mut sample_index = 0u32;
        for (lineno, line) in raw.lines().enumerate() {
            let line = line?;
            let malformed = |reason: String| Error::MalformedLine {
                path: raw_log.to_path_buf(),
                line: lineno + 1,
                reason,
            };
            let (slots, context) = parse_impression(&line).map_err(malformed)?;

            for &(item_id, flag) in &slots {
                if item_id < 0 || item_id as usize >= item_num {
                    return Err(Error::UnknownItem {
                        path: raw_log.to_path_buf(),
                        line: lineno + 1,
                        item_id,
                        item_num,
                    });
                }
                max_dim = max_dim.max(item_id).max(flag);
            }
            if let Some(&last) = context.last() {
                max_dim = max_dim.max(last);
            }

            writer.put(&encode_index(sample_index), &encode_sample(&slots, &context))?;
            sample_index += 1;
            if sample_index as usize % self.flush_every == 0 {
                info!(samples = sample_index, max_dim, "impressions written");
            }
        }

        let meta = Metadata {
            max_dim,
            item_num: item_num as i32,
        };
        writer.commit(meta)?;
        info!(samples = sample_index, ?meta, "cache build complete");
        Ok(meta)
    }
}

/// Build with the default flush interval.
pub fn build(raw_log: &Path, item_log: &Path, store_path: &Path) -> Result<Metadata> {
    CacheBuilder::default().build(raw_log, item_log, store_path)
}
