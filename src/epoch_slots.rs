use crate::crds_value::{new_rand_timestamp, sanitize_wallclock, MAX_SLOT};
use bincode::{deserialize, serialize, serialized_size};
use bv::{Bits, BitsMut, BitVec};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rand::Rng;
use solana_sdk::clock::Slot;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::sanitize::{Sanitize, SanitizeError};
use std::io::{Read, Write};
use thiserror::Error;

/// Hard cap on the number of slots one EpochSlots value may span.
const MAX_SLOTS_PER_ENTRY: usize = 2048 * 8;
/// Serialized size budget for one gossip value; an entry stops growing
/// once another compressed group would not fit under this.
const MAX_CRDS_OBJECT_SIZE: usize = 928;

#[derive(Debug, Error)]
pub enum Error {
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("bitmap serialization error: {0}")]
    Serialize(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A contiguous run of slots starting at `first_slot`, stored as a bitmap
/// where bit `i` marks `first_slot + i` as complete.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Uncompressed {
    pub first_slot: Slot,
    pub num: usize,
    pub slots: BitVec<u8>,
}

impl Sanitize for Uncompressed {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        if self.first_slot >= MAX_SLOT {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.num >= MAX_SLOTS_PER_ENTRY {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.slots.len() % 8 != 0 {
            // bitmap must be byte aligned
            return Err(SanitizeError::ValueOutOfBounds);
        }
        Ok(())
    }
}

impl Uncompressed {
    pub fn new(max_size: usize) -> Self {
        Self {
            first_slot: 0,
            num: 0,
            slots: BitVec::new_fill(false, 8 * max_size as u64),
        }
    }

    /// Marks the given ascending slots in the bitmap. Returns how many of
    /// them were recorded; stops early at the first slot that precedes
    /// `first_slot` or falls beyond the bitmap.
    pub fn add(&mut self, slots: &[Slot]) -> usize {
        for (i, s) in slots.iter().enumerate() {
            if self.num == 0 {
                self.first_slot = *s;
            }
            if *s < self.first_slot {
                return i;
            }
            if *s - self.first_slot >= self.slots.len() {
                return i;
            }
            self.slots.set_bit(*s - self.first_slot, true);
            self.num = self.num.max((*s - self.first_slot + 1) as usize);
        }
        slots.len()
    }

    pub fn to_slots(&self, min_slot: Slot) -> Vec<Slot> {
        let start = if min_slot < self.first_slot {
            0
        } else {
            (min_slot - self.first_slot) as usize
        };
        (start..self.num)
            .filter(|i| self.slots.get_bit(*i as u64))
            .map(|i| self.first_slot + i as u64)
            .collect()
    }
}

/// The deflate-compressed form of an [`Uncompressed`] bitmap.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Flate2 {
    pub first_slot: Slot,
    pub num: usize,
    #[serde(with = "serde_bytes")]
    pub compressed: Vec<u8>,
}

impl Sanitize for Flate2 {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        if self.first_slot >= MAX_SLOT {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.num >= MAX_SLOTS_PER_ENTRY {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        Ok(())
    }
}

impl Flate2 {
    fn deflate(unc: Uncompressed) -> Result<Self> {
        let bits = serialize(&unc.slots)?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&bits)?;
        let compressed = encoder.finish()?;
        Ok(Self {
            first_slot: unc.first_slot,
            num: unc.num,
            compressed,
        })
    }

    pub fn inflate(&self) -> Result<Uncompressed> {
        let mut decoder = DeflateDecoder::new(&self.compressed[..]);
        let mut bits = Vec::new();
        decoder.read_to_end(&mut bits)?;
        Ok(Uncompressed {
            first_slot: self.first_slot,
            num: self.num,
            slots: deserialize(&bits)?,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CompressedSlots {
    Flate2(Flate2),
    Uncompressed(Uncompressed),
}

impl Sanitize for CompressedSlots {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        match self {
            CompressedSlots::Uncompressed(a) => a.sanitize(),
            CompressedSlots::Flate2(b) => b.sanitize(),
        }
    }
}

impl Default for CompressedSlots {
    fn default() -> Self {
        CompressedSlots::new(0)
    }
}

impl CompressedSlots {
    fn new(max_size: usize) -> Self {
        CompressedSlots::Uncompressed(Uncompressed::new(max_size))
    }

    pub fn first_slot(&self) -> Slot {
        match self {
            CompressedSlots::Uncompressed(a) => a.first_slot,
            CompressedSlots::Flate2(b) => b.first_slot,
        }
    }

    pub fn num_slots(&self) -> usize {
        match self {
            CompressedSlots::Uncompressed(a) => a.num,
            CompressedSlots::Flate2(b) => b.num,
        }
    }

    /// Compressed groups are frozen; only the trailing uncompressed group
    /// accepts new slots.
    pub fn add(&mut self, slots: &[Slot]) -> usize {
        match self {
            CompressedSlots::Uncompressed(vals) => vals.add(slots),
            CompressedSlots::Flate2(_) => 0,
        }
    }

    pub fn to_slots(&self, min_slot: Slot) -> Result<Vec<Slot>> {
        match self {
            CompressedSlots::Uncompressed(vals) => Ok(vals.to_slots(min_slot)),
            CompressedSlots::Flate2(vals) => Ok(vals.inflate()?.to_slots(min_slot)),
        }
    }

    pub fn deflate(&mut self) -> Result<()> {
        match self {
            CompressedSlots::Uncompressed(vals) => {
                let compressed = Flate2::deflate(vals.clone())?;
                *self = CompressedSlots::Flate2(compressed);
                Ok(())
            }
            CompressedSlots::Flate2(_) => Ok(()),
        }
    }
}

/// Gossiped advertisement of which recent slots a node has completed.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EpochSlots {
    pub from: Pubkey,
    pub slots: Vec<CompressedSlots>,
    pub wallclock: u64,
}

impl Sanitize for EpochSlots {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        sanitize_wallclock(self.wallclock)?;
        self.slots.sanitize()
    }
}

impl EpochSlots {
    pub fn new(from: Pubkey, now: u64) -> Self {
        Self {
            from,
            slots: vec![],
            wallclock: now,
        }
    }

    /// Records as many of the given ascending slots as fit, deflating full
    /// groups and opening new ones while the serialized size budget
    /// allows. Returns the number of slots recorded.
    pub fn fill(&mut self, slots: &[Slot], now: u64) -> usize {
        let mut num = 0;
        self.wallclock = std::cmp::max(now, self.wallclock + 1);
        while num < slots.len() {
            num += self.add(&slots[num..]);
            if num < slots.len() {
                if self.deflate().is_err() {
                    return num;
                }
                let space = self.max_compressed_slot_size();
                if space > 0 {
                    let cslot = CompressedSlots::new(space as usize);
                    self.slots.push(cslot);
                } else {
                    return num;
                }
            }
        }
        num
    }

    pub fn add(&mut self, slots: &[Slot]) -> usize {
        let mut num = 0;
        for group in self.slots.iter_mut() {
            num += group.add(&slots[num..]);
            if num == slots.len() {
                break;
            }
        }
        num
    }

    pub fn deflate(&mut self) -> Result<()> {
        for group in self.slots.iter_mut() {
            group.deflate()?;
        }
        Ok(())
    }

    pub fn max_compressed_slot_size(&self) -> isize {
        let len_header = serialized_size(self).unwrap() as isize;
        let len_slot = serialized_size(&CompressedSlots::default()).unwrap() as isize;
        MAX_CRDS_OBJECT_SIZE as isize - (len_header + len_slot)
    }

    pub fn first_slot(&self) -> Option<Slot> {
        self.slots.iter().map(CompressedSlots::first_slot).min()
    }

    pub fn to_slots(&self, min_slot: Slot) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|s| min_slot < s.first_slot().saturating_add(s.num_slots() as u64))
            .filter_map(|s| s.to_slots(min_slot).ok())
            .flatten()
            .collect()
    }

    /// New random EpochSlots for tests and benchmarks.
    pub(crate) fn new_rand<R: Rng>(rng: &mut R, pubkey: Option<Pubkey>) -> Self {
        let now = new_rand_timestamp(rng);
        let pubkey = pubkey.unwrap_or_else(Pubkey::new_unique);
        let mut epoch_slots = Self::new(pubkey, now);
        let num_slots = rng.gen_range(0..20);
        let mut slots: Vec<Slot> = std::iter::repeat_with(|| 47825632 + rng.gen_range(0..512))
            .take(num_slots)
            .collect();
        slots.sort_unstable();
        slots.dedup();
        epoch_slots.fill(&slots, now);
        epoch_slots
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn test_uncompressed_add() {
        let mut slots = Uncompressed::new(32);
        assert_eq!(slots.add(&[1]), 1);
        assert_eq!(slots.num, 1);
        assert_eq!(slots.first_slot, 1);
        assert_eq!(slots.to_slots(1), vec![1]);
        // A slot before the base stops the scan.
        assert_eq!(slots.add(&[0]), 0);
        // A slot beyond the bitmap stops the scan.
        assert_eq!(slots.add(&[2, 1 + 8 * 32]), 1);
        assert_eq!(slots.num, 2);
        assert_eq!(slots.to_slots(0), vec![1, 2]);
        assert_eq!(slots.to_slots(2), vec![2]);
    }

    #[test]
    fn test_compress_round_trip() {
        let mut slots = Uncompressed::new(32);
        assert_eq!(slots.add(&[100, 101, 104, 200]), 4);
        let compressed = Flate2::deflate(slots.clone()).unwrap();
        assert_eq!(compressed.first_slot, 100);
        assert_eq!(compressed.num, slots.num);
        let inflated = compressed.inflate().unwrap();
        assert_eq!(inflated, slots);
        assert_eq!(inflated.to_slots(0), vec![100, 101, 104, 200]);
    }

    #[test]
    fn test_epoch_slots_fill() {
        let mut epoch_slots = EpochSlots::new(Pubkey::new_unique(), 7);
        let slots: Vec<Slot> = (100..1124).collect();
        assert_eq!(epoch_slots.fill(&slots, 8), slots.len());
        assert!(epoch_slots.wallclock >= 8);
        assert_eq!(epoch_slots.first_slot(), Some(100));
        assert_eq!(epoch_slots.to_slots(0), slots);
        assert_eq!(epoch_slots.to_slots(500), (500..1124).collect::<Vec<_>>());
        // Deflating every group preserves the contents.
        epoch_slots.deflate().unwrap();
        assert_eq!(epoch_slots.to_slots(0), slots);
    }

    #[test]
    fn test_epoch_slots_wire_round_trip() {
        let mut rng = thread_rng();
        for _ in 0..8 {
            let epoch_slots = EpochSlots::new_rand(&mut rng, None);
            let bytes = serialize(&epoch_slots).unwrap();
            let other: EpochSlots = deserialize(&bytes).unwrap();
            assert_eq!(other, epoch_slots);
        }
    }

    #[test]
    fn test_epoch_slots_sanitize() {
        let mut epoch_slots = EpochSlots::new(Pubkey::new_unique(), 7);
        epoch_slots.fill(&[10, 11, 12], 8);
        assert!(epoch_slots.sanitize().is_ok());
        epoch_slots.wallclock = MAX_SLOT;
        assert_eq!(epoch_slots.sanitize(), Err(SanitizeError::ValueOutOfBounds));
    }
}
