//! Index of crds table entries by the leading bits of their value hash.
//!
//! Pull requests sample the sender's view of the table with a (mask,
//! mask_bits) pair over value hashes. Bucketing entries by a fixed-width
//! hash prefix lets [`find`](CrdsShards::find) enumerate the matching
//! entries by touching only the buckets the mask can reach.

use crate::crds::VersionedCrdsValue;
use indexmap::map::IndexMap;
use solana_sdk::hash::Hash;

#[derive(Clone)]
pub struct CrdsShards {
    // Shard index to (index within crds table, hash prefix) mapping.
    shards: Vec<IndexMap<usize, u64>>,
    shard_bits: u32,
}

/// First eight bytes of the hash interpreted as a little-endian u64; the
/// prefix all mask matching is defined over.
pub(crate) fn hash_as_u64(hash: &Hash) -> u64 {
    let buf = hash.as_ref()[..8].try_into().unwrap();
    u64::from_le_bytes(buf)
}

impl CrdsShards {
    pub fn new(shard_bits: u32) -> Self {
        CrdsShards {
            shards: vec![IndexMap::new(); 1 << shard_bits],
            shard_bits,
        }
    }

    #[must_use]
    pub fn insert(&mut self, index: usize, value: &VersionedCrdsValue) -> bool {
        let hash = hash_as_u64(&value.value_hash);
        self.shard_mut(hash).insert(index, hash).is_none()
    }

    #[must_use]
    pub fn remove(&mut self, index: usize, value: &VersionedCrdsValue) -> bool {
        let hash = hash_as_u64(&value.value_hash);
        self.shard_mut(hash).swap_remove(&index).is_some()
    }

    /// Returns indices of all values whose first `mask_bits` hash bits
    /// equal the first `mask_bits` of `mask`. With `mask_bits == 0` every
    /// index matches; with `mask_bits` beyond the shard width, matching
    /// entries all live in one bucket and are filtered by stored prefix.
    pub fn find(&self, mask: u64, mask_bits: u32) -> impl Iterator<Item = usize> + '_ {
        let match_mask = mask.checked_shr(64 - mask_bits).unwrap_or(0);
        let shard_bits = self.shard_bits;
        if mask_bits < shard_bits {
            // The mask pins only the first bits of the shard index, so the
            // target spans a contiguous range of shards.
            Iter::Left(
                self.shards
                    .iter()
                    .enumerate()
                    .filter_map(move |(shard_index, shard)| {
                        if (shard_index as u64).checked_shr(shard_bits - mask_bits).unwrap_or(0) == match_mask {
                            Some(shard.keys().copied())
                        } else {
                            None
                        }
                    })
                    .flatten(),
            )
        } else if mask_bits == shard_bits {
            // The mask is exactly the shard index.
            Iter::Middle(self.shard(mask).keys().copied())
        } else {
            // The mask is finer than the shard width; filter entries of
            // the single reachable shard by their stored prefix.
            let pred = move |(&index, hash): (&usize, &u64)| {
                if hash >> (64 - mask_bits) == match_mask {
                    Some(index)
                } else {
                    None
                }
            };
            Iter::Right(self.shard(mask).iter().filter_map(pred))
        }
    }

    #[inline]
    fn shard_index(&self, hash: u64) -> usize {
        (hash >> (64 - self.shard_bits)) as usize
    }

    #[inline]
    fn shard(&self, hash: u64) -> &IndexMap<usize, u64> {
        let shard_index = self.shard_index(hash);
        &self.shards[shard_index]
    }

    #[inline]
    fn shard_mut(&mut self, hash: u64) -> &mut IndexMap<usize, u64> {
        let shard_index = self.shard_index(hash);
        &mut self.shards[shard_index]
    }

    // Checks invariants in the shards tables against the crds table.
    #[cfg(test)]
    pub(crate) fn check(&self, values: &[VersionedCrdsValue]) {
        let mut indices: Vec<_> = self
            .shards
            .iter()
            .flat_map(IndexMap::keys)
            .copied()
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..values.len()).collect::<Vec<_>>());
        for (shard_index, shard) in self.shards.iter().enumerate() {
            for (index, hash) in shard {
                assert_eq!(*hash, hash_as_u64(&values[*index].value_hash));
                assert_eq!(
                    shard_index as u64,
                    hash >> (64 - self.shard_bits)
                );
            }
        }
    }
}

enum Iter<I, J, K> {
    Left(I),
    Middle(J),
    Right(K),
}

impl<T, I, J, K> Iterator for Iter<I, J, K>
where
    I: Iterator<Item = T>,
    J: Iterator<Item = T>,
    K: Iterator<Item = T>,
{
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Left(iter) => iter.next(),
            Self::Middle(iter) => iter.next(),
            Self::Right(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crds::Cursor;
    use crate::crds_value::CrdsValue;
    use rand::{thread_rng, Rng};
    use std::collections::HashSet;
    use std::iter::repeat_with;

    const SHARD_BITS: u32 = 12;

    fn new_test_crds_value<R: Rng>(rng: &mut R) -> VersionedCrdsValue {
        let value = CrdsValue::new_rand(rng, None);
        VersionedCrdsValue::new(value, Cursor::default(), rng.gen())
    }

    // Returns true if the first mask_bits most significant bits of hash is
    // the same as the given bit mask.
    fn check_mask(value: &VersionedCrdsValue, mask: u64, mask_bits: u32) -> bool {
        let hash = hash_as_u64(&value.value_hash);
        let ones = (!0u64).checked_shr(mask_bits).unwrap_or(0u64);
        (hash | ones) == (mask | ones)
    }

    // Manual filtering by scanning all the values.
    fn filter_crds_values(
        values: &[VersionedCrdsValue],
        mask: u64,
        mask_bits: u32,
    ) -> HashSet<usize> {
        values
            .iter()
            .enumerate()
            .filter_map(|(index, value)| {
                if check_mask(value, mask, mask_bits) {
                    Some(index)
                } else {
                    None
                }
            })
            .collect()
    }

    #[test]
    fn test_shards_insert_remove() {
        let mut rng = thread_rng();
        let values: Vec<_> = repeat_with(|| new_test_crds_value(&mut rng))
            .take(256)
            .collect();
        let mut shards = CrdsShards::new(SHARD_BITS);
        for (index, value) in values.iter().enumerate() {
            assert!(shards.insert(index, value));
        }
        shards.check(&values);
        // Double insert of the same index fails.
        assert!(!shards.insert(37, &values[37]));
        for (index, value) in values.iter().enumerate() {
            assert!(shards.remove(index, value));
        }
        // Remove of an absent index fails.
        assert!(!shards.remove(0, &values[0]));
    }

    #[test]
    fn test_shards_find() {
        let mut rng = thread_rng();
        let values: Vec<_> = repeat_with(|| new_test_crds_value(&mut rng))
            .take(1024)
            .collect();
        let mut shards = CrdsShards::new(SHARD_BITS);
        for (index, value) in values.iter().enumerate() {
            assert!(shards.insert(index, value));
        }
        // A zero-width mask matches the whole table.
        assert_eq!(
            shards.find(rng.gen(), 0).collect::<HashSet<_>>(),
            (0..values.len()).collect::<HashSet<_>>(),
        );
        // Masks coarser, equal to, and finer than the shard width all
        // agree with the brute force scan.
        for mask_bits in [1, 4, SHARD_BITS - 1, SHARD_BITS, SHARD_BITS + 1, 24, 64] {
            for _ in 0..16 {
                let index = rng.gen_range(0..values.len());
                let mask = hash_as_u64(&values[index].value_hash);
                assert_eq!(
                    shards.find(mask, mask_bits).collect::<HashSet<_>>(),
                    filter_crds_values(&values, mask, mask_bits),
                );
            }
            let mask = rng.gen();
            assert_eq!(
                shards.find(mask, mask_bits).collect::<HashSet<_>>(),
                filter_crds_values(&values, mask, mask_bits),
            );
        }
        // A full-width mask matches at most the one value with that exact
        // hash prefix.
        let index = rng.gen_range(0..values.len());
        let mask = hash_as_u64(&values[index].value_hash);
        let matches: Vec<_> = shards.find(mask, 64).collect();
        assert!(matches.contains(&index));
        for i in matches {
            assert_eq!(hash_as_u64(&values[i].value_hash), mask);
        }
    }
}
