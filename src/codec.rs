//! Fixed-width binary records.
//!
//! Every integer is a little-endian `i32`. A sample record is the ten
//! `(item_id, flag)` slot pairs followed by the sorted context feature ids;
//! an item record is just its sorted feature ids. Sample keys are the
//! big-endian sample index so that byte order matches numeric order.

use crate::error::{Error, Result};

/// Display positions per impression.
pub const SLOTS: usize = 10;

/// Integers occupied by the slot pairs at the head of a sample record.
pub const SLOT_INTS: usize = SLOTS * 2;

pub type SlotPairs = [(i32, i32); SLOTS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub slots: SlotPairs,
    pub context: Vec<i32>,
}

pub fn encode_sample(slots: &SlotPairs, context: &[i32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity((SLOT_INTS + context.len()) * 4);
    for (item_id, flag) in slots {
        buf.extend_from_slice(&item_id.to_le_bytes());
        buf.extend_from_slice(&flag.to_le_bytes());
    }
    for id in context {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

pub fn decode_sample(bytes: &[u8]) -> Result<SampleRecord> {
    let ints = decode_sample_ints(bytes)?;
    let mut slots = [(0, 0); SLOTS];
    for (slot, pair) in slots.iter_mut().zip(ints.chunks_exact(2)) {
        *slot = (pair[0], pair[1]);
    }
    Ok(SampleRecord {
        slots,
        context: ints[SLOT_INTS..].to_vec(),
    })
}

/// Decode a sample record as a flat integer list, checking it holds at least
/// the slot region.
pub fn decode_sample_ints(bytes: &[u8]) -> Result<Vec<i32>> {
    let ints = decode_ints(bytes)?;
    if ints.len() < SLOT_INTS {
        return Err(Error::MalformedRecord {
            len: bytes.len(),
            reason: "sample record shorter than its slot region",
        });
    }
    Ok(ints)
}

pub fn encode_item(features: &[i32]) -> Vec<u8> {
    encode_ints(features)
}

pub fn decode_item(bytes: &[u8]) -> Result<Vec<i32>> {
    decode_ints(bytes)
}

pub fn encode_index(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

pub fn item_key(item_id: u32) -> Vec<u8> {
    format!("item_{item_id}").into_bytes()
}

pub(crate) fn encode_ints(ints: &[i32]) -> Vec<u8> {
    ints.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_ints(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::MalformedRecord {
            len: bytes.len(),
            reason: "length is not a multiple of 4",
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn slots() -> SlotPairs {
        let mut s = [(0, 0); SLOTS];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = (i as i32 * 3, (i % 2) as i32);
        }
        s
    }

    #[test]
    fn sample_round_trip() {
        let context = vec![1, 5, 99, 1_000_000];
        let bytes = encode_sample(&slots(), &context);
        assert_eq!(bytes.len(), (SLOT_INTS + context.len()) * 4);

        let rec = decode_sample(&bytes).unwrap();
        assert_eq!(rec.slots, slots());
        assert_eq!(rec.context, context);
    }

    #[test]
    fn sample_with_empty_context() {
        let rec = decode_sample(&encode_sample(&slots(), &[])).unwrap();
        assert!(rec.context.is_empty());
    }

    #[test]
    fn item_round_trip() {
        let feats = vec![2, 3, 17];
        assert_eq!(decode_item(&encode_item(&feats)).unwrap(), feats);
        assert!(decode_item(&[]).unwrap().is_empty());
    }

    #[test]
    fn random_records_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let mut slots = [(0, 0); SLOTS];
            for slot in slots.iter_mut() {
                *slot = (rng.gen_range(0..100_000), rng.gen_range(0..=1));
            }
            let len = rng.gen_range(0..64);
            let mut context: Vec<i32> = (0..len).map(|_| rng.gen_range(1..i32::MAX)).collect();
            context.sort_unstable();

            let rec = decode_sample(&encode_sample(&slots, &context)).unwrap();
            assert_eq!(rec.slots, slots);
            assert_eq!(rec.context, context);
            assert_eq!(decode_item(&encode_item(&context)).unwrap(), context);
        }
    }

    #[test]
    fn ints_are_little_endian() {
        assert_eq!(encode_item(&[1]), vec![1, 0, 0, 0]);
    }

    #[test]
    fn index_keys_sort_numerically() {
        assert_eq!(encode_index(1), [0, 0, 0, 1]);
        assert!(encode_index(255) < encode_index(256));
        assert!(encode_index(65_535) < encode_index(1 << 24));
    }

    #[test]
    fn rejects_ragged_length() {
        let err = decode_item(&[0, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { len: 5, .. }));
    }

    #[test]
    fn rejects_truncated_sample() {
        let bytes = encode_ints(&[0; SLOT_INTS - 1]);
        assert!(matches!(
            decode_sample(&bytes),
            Err(Error::MalformedRecord { .. })
        ));
    }
}
