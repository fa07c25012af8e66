//! On-disk key-value store.
//!
//! A store is a directory with two files:
//!
//! * `records.bin`: every value blob, concatenated in write order
//! * `index.fst`: an FST map from key bytes to the value's location
//!
//! Location values pack `(offset << 24) | len`, so a single value is capped at
//! 16 MiB and the records file at 1 TiB. Both files are memory-mapped on open;
//! lookups are one FST walk plus a slice, and the store is never mutated after
//! the build commits, so any number of readers can share it.

use crate::codec::{decode_ints, encode_ints};
use crate::error::{Error, Result};
use fst::{Map, MapBuilder};
use memmap2::Mmap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RECORDS_FILE: &str = "records.bin";
pub const INDEX_FILE: &str = "index.fst";
pub const MAX_DIM_KEY: &[u8] = b"max_dim";
pub const ITEM_NUM_KEY: &[u8] = b"item_num";

const LEN_BITS: u32 = 24;
const MAX_LEN: u64 = (1 << LEN_BITS) - 1;
const MAX_OFFSET: u64 = (1 << 40) - 1;

/// Store-level scalars, exactly as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Largest feature id seen in the raw impression log.
    pub max_dim: i32,
    pub item_num: i32,
}

fn pack_location(offset: u64, len: usize) -> Result<u64> {
    if offset > MAX_OFFSET || len as u64 > MAX_LEN {
        return Err(Error::RecordTooLarge { offset, len });
    }
    Ok((offset << LEN_BITS) | len as u64)
}

fn unpack_location(v: u64) -> (usize, usize) {
    ((v >> LEN_BITS) as usize, (v & MAX_LEN) as usize)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".partial");
    PathBuf::from(s)
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writes a fresh store into a staging directory and moves it into place on
/// [`StoreWriter::commit`]. Dropping an uncommitted writer removes the staging
/// directory, so an interrupted build never leaves a readable store.
pub struct StoreWriter {
    path: PathBuf,
    staging: PathBuf,
    records: BufWriter<File>,
    // fst::MapBuilder requires sorted inserts
    keys: BTreeMap<Vec<u8>, u64>,
    offset: u64,
    pending: usize,
    flush_every: usize,
    committed: bool,
}

impl StoreWriter {
    pub fn create(path: impl AsRef<Path>, flush_every: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let staging = staging_path(&path);
        remove_dir_if_present(&staging)?;
        fs::create_dir_all(&staging)?;
        let records = File::create(staging.join(RECORDS_FILE))?;
        debug!(staging = %staging.display(), "opened store staging directory");

        Ok(Self {
            path,
            staging,
            records: BufWriter::with_capacity(1 << 20, records),
            keys: BTreeMap::new(),
            offset: 0,
            pending: 0,
            flush_every: flush_every.max(1),
            committed: false,
        })
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let loc = pack_location(self.offset, value.len())?;
        self.records.write_all(value)?;
        self.offset += value.len() as u64;
        self.keys.insert(key.to_vec(), loc);

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.records.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Write the metadata entries, seal the index and move the store onto
    /// its final path. Any previous store at that path is replaced.
    pub fn commit(mut self, meta: Metadata) -> Result<()> {
        self.put(MAX_DIM_KEY, &encode_ints(&[meta.max_dim]))?;
        self.put(ITEM_NUM_KEY, &encode_ints(&[meta.item_num]))?;
        self.records.flush()?;
        self.records.get_ref().sync_all()?;

        let index = File::create(self.staging.join(INDEX_FILE))?;
        let mut builder = MapBuilder::new(BufWriter::new(index))?;
        for (key, loc) in &self.keys {
            builder.insert(key, *loc)?;
        }
        let mut index = builder.into_inner()?;
        index.flush()?;
        index.get_ref().sync_all()?;

        remove_dir_if_present(&self.path)?;
        fs::rename(&self.staging, &self.path)?;
        self.committed = true;
        info!(
            path = %self.path.display(),
            entries = self.keys.len(),
            bytes = self.offset,
            "store committed"
        );
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}

/// Read-only view over a committed store.
pub struct Store {
    path: PathBuf,
    index: Map<Mmap>,
    records: Mmap,
    meta: Metadata,
}

impl Store {
    /// Open a committed store. A missing directory, missing file or missing
    /// metadata entry all report [`Error::NotBuilt`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let not_built = || Error::NotBuilt { path: path.clone() };

        let index_path = path.join(INDEX_FILE);
        let records_path = path.join(RECORDS_FILE);
        if !index_path.is_file() || !records_path.is_file() {
            return Err(not_built());
        }

        let file = File::open(&index_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        // a truncated or empty index means the build never committed
        let index = Map::new(mmap).map_err(|_| not_built())?;
        let file = File::open(&records_path)?;
        let records = unsafe { Mmap::map(&file)? };

        let scalar = |key: &[u8]| -> Result<Option<i32>> {
            let Some(v) = index.get(key) else {
                return Ok(None);
            };
            let (offset, len) = unpack_location(v);
            let bytes = records.get(offset..offset + len).ok_or_else(not_built)?;
            Ok(decode_ints(bytes)?.first().copied())
        };
        let (Some(max_dim), Some(item_num)) = (scalar(MAX_DIM_KEY)?, scalar(ITEM_NUM_KEY)?) else {
            return Err(not_built());
        };
        let meta = Metadata { max_dim, item_num };
        debug!(path = %path.display(), entries = index.len(), ?meta, "opened store");

        Ok(Self {
            path,
            index,
            records,
            meta,
        })
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let (offset, len) = unpack_location(self.index.get(key)?);
        self.records.get(offset..offset + len)
    }

    pub fn metadata(&self) -> Metadata {
        self.meta
    }

    /// Total key count, metadata entries included.
    pub fn entries(&self) -> usize {
        self.index.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a store and any staging leftovers. Absent paths are fine.
    pub fn discard(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        remove_dir_if_present(&staging_path(path))?;
        remove_dir_if_present(path)
    }
}
