use crate::crds_value::sanitize_wallclock;
use rand::Rng;
use solana_sdk::clock::Slot;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::sanitize::{Sanitize, SanitizeError};
use thiserror::Error;

pub type DuplicateShredIndex = u16;
pub const MAX_DUPLICATE_SHREDS: DuplicateShredIndex = 512;

/// The two kinds of shreds a leader can produce. Wire representation is a
/// single magic byte shared with the ledger's shred headers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ShredType {
    Data = 0b1010_0101,
    Code = 0b0101_1010,
}

impl From<ShredType> for u8 {
    fn from(shred_type: ShredType) -> Self {
        shred_type as u8
    }
}

impl TryFrom<u8> for ShredType {
    type Error = Error;
    fn try_from(shred_type: u8) -> Result<Self, Self::Error> {
        match shred_type {
            0b1010_0101 => Ok(Self::Data),
            0b0101_1010 => Ok(Self::Code),
            _ => Err(Error::InvalidShredType),
        }
    }
}

/// One chunk of a serialized duplicate-slot proof, gossiped so the rest of
/// the cluster can observe that a leader produced conflicting shreds for a
/// slot. Proofs exceed a single gossip value's budget, so they are split
/// into `num_chunks` pieces sharing the same (slot, shred_index, type).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateShred {
    pub from: Pubkey,
    pub wallclock: u64,
    pub slot: Slot,
    pub(crate) shred_index: u32,
    pub(crate) shred_type: ShredType,
    // Serialized DuplicateSlotProof split into chunks.
    pub(crate) num_chunks: u8,
    pub(crate) chunk_index: u8,
    #[serde(with = "serde_bytes")]
    pub(crate) chunk: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("data chunk mismatch")]
    DataChunkMismatch,
    #[error("invalid chunk index")]
    InvalidChunkIndex,
    #[error("invalid shred type")]
    InvalidShredType,
    #[error("missing data chunk")]
    MissingDataChunk,
    #[error("proof payload is too big")]
    ProofTooLarge,
}

/// Splits a serialized duplicate-slot proof into gossipable chunks of at
/// most `max_chunk_size` bytes each.
pub fn from_proof(
    from: Pubkey,
    wallclock: u64,
    slot: Slot,
    shred_index: u32,
    shred_type: ShredType,
    proof: &[u8],
    max_chunk_size: usize,
) -> Result<impl Iterator<Item = DuplicateShred> + '_, Error> {
    if proof.is_empty() {
        return Err(Error::MissingDataChunk);
    }
    let chunks = proof.chunks(max_chunk_size);
    let num_chunks = u8::try_from(chunks.len()).map_err(|_| Error::ProofTooLarge)?;
    Ok(chunks.enumerate().map(move |(index, chunk)| DuplicateShred {
        from,
        wallclock,
        slot,
        shred_index,
        shred_type,
        num_chunks,
        chunk_index: index as u8,
        chunk: chunk.to_vec(),
    }))
}

/// Reassembles the serialized proof from its gossiped chunks. The chunks
/// may arrive in any order but must be complete and consistent.
pub fn into_proof<I>(chunks: I) -> Result<Vec<u8>, Error>
where
    I: IntoIterator<Item = DuplicateShred>,
{
    let mut chunks: Vec<_> = chunks.into_iter().collect();
    chunks.sort_unstable_by_key(|chunk| chunk.chunk_index);
    let num_chunks = match chunks.first() {
        Some(chunk) => chunk.num_chunks,
        None => return Err(Error::MissingDataChunk),
    };
    if chunks.len() != num_chunks as usize {
        return Err(Error::MissingDataChunk);
    }
    let mut proof = Vec::new();
    for (index, chunk) in chunks.into_iter().enumerate() {
        if chunk.num_chunks != num_chunks {
            return Err(Error::DataChunkMismatch);
        }
        if chunk.chunk_index as usize != index {
            return Err(Error::InvalidChunkIndex);
        }
        proof.extend_from_slice(&chunk.chunk);
    }
    Ok(proof)
}

impl Sanitize for DuplicateShred {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        sanitize_wallclock(self.wallclock)?;
        if self.chunk_index >= self.num_chunks {
            return Err(SanitizeError::IndexOutOfBounds);
        }
        Ok(())
    }
}

impl DuplicateShred {
    /// New random DuplicateShred for tests and benchmarks.
    pub(crate) fn new_rand<R: Rng>(rng: &mut R, pubkey: Option<Pubkey>) -> Self {
        let num_chunks = rng.gen_range(2..10);
        Self {
            from: pubkey.unwrap_or_else(Pubkey::new_unique),
            wallclock: crate::crds_value::new_rand_timestamp(rng),
            slot: rng.gen(),
            shred_index: rng.gen(),
            shred_type: ShredType::Data,
            num_chunks,
            chunk_index: rng.gen_range(0..num_chunks),
            chunk: std::iter::repeat_with(|| rng.gen()).take(32).collect(),
        }
    }
}
