//! Consensus boundary: content identifiers, batching, and the sink that
//! finalized bound witnesses are handed to.
//!
//! The consensus provider itself (block submission, staking, governance)
//! lives outside this workspace. Nodes only push data into a
//! [`ConsensusSink`]; nothing flows back.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use blake3::Hasher;
use codec::BoundWitness;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use witness::{WitnessError, WitnessHash};

/// Multihash function code for blake3-256.
const MULTIHASH_BLAKE3: u8 = 0x1e;
/// Multihash digest length marker.
const MULTIHASH_LEN: u8 = 0x20;

/// Consensus level error codes.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("witness error: {0}")]
    Witness(#[from] WitnessError),
    #[error("invalid content identifier")]
    InvalidContentId,
    #[error("consensus provider rejected submission: {0}")]
    Rejected(String),
}

/// Content-addressed identifier of a bound witness, laid out like a
/// multihash (`code`, `length`, `digest`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 34]);

impl ContentId {
    pub fn from_hash(hash: WitnessHash) -> Self {
        Self::from_bytes32(*hash.as_bytes())
    }

    pub fn for_witness(witness: &BoundWitness) -> Result<Self, ConsensusError> {
        Ok(Self::from_hash(WitnessHash::of(witness)?))
    }

    /// Rebuild an identifier from the 32-byte digest stored on chain.
    pub fn from_bytes32(digest: [u8; 32]) -> Self {
        let mut bytes = [0u8; 34];
        bytes[0] = MULTIHASH_BLAKE3;
        bytes[1] = MULTIHASH_LEN;
        bytes[2..].copy_from_slice(&digest);
        Self(bytes)
    }

    /// Digest without the multihash prefix, as submitted on chain.
    pub fn to_bytes32(&self) -> [u8; 32] {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&self.0[2..]);
        digest
    }

    pub fn as_bytes(&self) -> &[u8; 34] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentId {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ConsensusError::InvalidContentId)?;
        let bytes: [u8; 34] = bytes
            .try_into()
            .map_err(|_| ConsensusError::InvalidContentId)?;
        if bytes[0] != MULTIHASH_BLAKE3 || bytes[1] != MULTIHASH_LEN {
            return Err(ConsensusError::InvalidContentId);
        }
        Ok(Self(bytes))
    }
}

/// Finalized witnesses submitted together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WitnessBatch {
    pub entries: Vec<(ContentId, BoundWitness)>,
}

impl WitnessBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContentId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Hash of a block committing to this batch on top of `previous`.
    pub fn block_hash(&self, previous: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(previous);
        for id in self.ids() {
            hasher.update(&id.to_bytes32());
        }
        hasher.finalize().into()
    }
}

/// Receiver of finalized witness batches and the block hashes that commit
/// to them.
#[async_trait]
pub trait ConsensusSink: Send + Sync {
    async fn submit_batch(&self, batch: WitnessBatch) -> Result<(), ConsensusError>;

    async fn submit_block_hash(&self, hash: [u8; 32]) -> Result<(), ConsensusError>;
}

/// Content ids a [`BatchBuilder`] remembers by default.
pub const DEFAULT_DEDUP_WINDOW: usize = 65_536;

/// Splits a stream of witnesses into deduplicated batches of bounded size.
///
/// Deduplication covers the most recent `dedup_window` ids; older ids are
/// forgotten and would be accepted again.
#[derive(Debug)]
pub struct BatchBuilder {
    max_batch: usize,
    dedup_window: usize,
    pending: VecDeque<(ContentId, BoundWitness)>,
    seen: HashSet<ContentId>,
    seen_order: VecDeque<ContentId>,
}

impl BatchBuilder {
    pub fn new(max_batch: usize) -> Self {
        Self::with_dedup_window(max_batch, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_dedup_window(max_batch: usize, dedup_window: usize) -> Self {
        Self {
            max_batch: max_batch.max(1),
            dedup_window: dedup_window.max(1),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Queue a witness. Returns `false` when it was recently queued or
    /// submitted through this builder.
    pub fn push(&mut self, witness: BoundWitness) -> Result<bool, ConsensusError> {
        let id = ContentId::for_witness(&witness)?;
        if !self.seen.insert(id) {
            debug!(%id, "skipping duplicate witness");
            return Ok(false);
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > self.dedup_window {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.pending.push_back((id, witness));
        Ok(true)
    }

    /// Number of content ids currently remembered for deduplication.
    pub fn remembered(&self) -> usize {
        self.seen.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drain everything queued so far into batches of at most `max_batch`.
    pub fn drain_batches(&mut self) -> Vec<WitnessBatch> {
        let mut batches = Vec::new();
        let mut pending = std::mem::take(&mut self.pending).into_iter().peekable();
        while pending.peek().is_some() {
            let entries: Vec<_> = pending.by_ref().take(self.max_batch).collect();
            batches.push(WitnessBatch { entries });
        }
        batches
    }

    /// Put batches that could not be submitted back ahead of anything
    /// queued since, keeping their order.
    pub fn restore(&mut self, batches: Vec<WitnessBatch>) {
        for entry in batches.into_iter().flat_map(|batch| batch.entries).rev() {
            self.pending.push_front(entry);
        }
    }
}

/// In-process sink that records everything it receives.
#[derive(Debug, Default)]
pub struct MemoryConsensus {
    batches: Mutex<Vec<WitnessBatch>>,
    block_hashes: Mutex<Vec<[u8; 32]>>,
}

impl MemoryConsensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<WitnessBatch> {
        self.batches.lock().clone()
    }

    pub fn block_hashes(&self) -> Vec<[u8; 32]> {
        self.block_hashes.lock().clone()
    }

    pub fn witness_count(&self) -> usize {
        self.batches.lock().iter().map(WitnessBatch::len).sum()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.batches
            .lock()
            .iter()
            .any(|batch| batch.ids().any(|known| known == id))
    }
}

#[async_trait]
impl ConsensusSink for MemoryConsensus {
    async fn submit_batch(&self, batch: WitnessBatch) -> Result<(), ConsensusError> {
        debug!(witnesses = batch.len(), "recording witness batch");
        self.batches.lock().push(batch);
        Ok(())
    }

    async fn submit_block_hash(&self, hash: [u8; 32]) -> Result<(), ConsensusError> {
        self.block_hashes.lock().push(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use codec::{KeySet, Payload, TypedObject};

    use super::*;

    fn witness(index: u32) -> BoundWitness {
        BoundWitness {
            key_sets: vec![KeySet::single([1u8; 32])],
            payloads: vec![Payload::new(vec![TypedObject::Index(index)], Vec::new())],
            signature_sets: Vec::new(),
        }
    }

    #[test]
    fn content_id_round_trips_through_bytes32_and_hex() {
        let id = ContentId::for_witness(&witness(1)).expect("id");
        assert_eq!(ContentId::from_bytes32(id.to_bytes32()), id);
        assert_eq!(id.to_string().parse::<ContentId>().expect("parse"), id);
        assert_eq!(id.as_bytes()[..2], [0x1e, 0x20]);
    }

    #[test]
    fn rejects_foreign_multihash_prefix() {
        let mut bytes = [0u8; 34];
        bytes[0] = 0x12;
        bytes[1] = 0x20;
        assert!(matches!(
            hex::encode(bytes).parse::<ContentId>(),
            Err(ConsensusError::InvalidContentId)
        ));
        assert!("zz".parse::<ContentId>().is_err());
    }

    #[test]
    fn batches_are_bounded_and_deduplicated() {
        let mut builder = BatchBuilder::new(2);
        for index in 0..5 {
            assert!(builder.push(witness(index)).expect("push"));
        }
        assert!(!builder.push(witness(0)).expect("duplicate"));

        let batches = builder.drain_batches();
        let sizes: Vec<_> = batches.iter().map(WitnessBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(builder.pending(), 0);
        assert!(builder.drain_batches().is_empty());
    }

    #[test]
    fn dedup_memory_is_bounded() {
        let mut builder = BatchBuilder::with_dedup_window(10, 2);
        for index in 0..3 {
            assert!(builder.push(witness(index)).expect("push"));
        }
        assert_eq!(builder.remembered(), 2);
        assert!(!builder.push(witness(2)).expect("recent duplicate"));
        // The oldest id fell out of the window.
        assert!(builder.push(witness(0)).expect("forgotten id"));
        assert_eq!(builder.remembered(), 2);
    }

    #[test]
    fn restored_batches_go_out_first() {
        let mut builder = BatchBuilder::new(2);
        for index in 0..3 {
            builder.push(witness(index)).expect("push");
        }
        let unsent = builder.drain_batches();
        builder.push(witness(3)).expect("push");
        builder.restore(unsent);
        assert_eq!(builder.pending(), 4);

        let expected: Vec<_> = (0..4)
            .map(|index| ContentId::for_witness(&witness(index)).expect("id"))
            .collect();
        let drained: Vec<_> = builder
            .drain_batches()
            .iter()
            .flat_map(|batch| batch.ids().copied().collect::<Vec<_>>())
            .collect();
        assert_eq!(drained, expected);
        assert!(!builder.push(witness(1)).expect("still remembered"));
    }

    #[test]
    fn block_hash_chains_on_previous() {
        let mut builder = BatchBuilder::new(10);
        builder.push(witness(1)).expect("push");
        let batch = builder.drain_batches().remove(0);
        assert_ne!(batch.block_hash(&[0u8; 32]), batch.block_hash(&[1u8; 32]));
    }

    #[tokio::test]
    async fn memory_sink_records_submissions() {
        let sink = MemoryConsensus::new();
        let mut builder = BatchBuilder::new(10);
        builder.push(witness(4)).expect("push");
        let batch = builder.drain_batches().remove(0);
        let id = *batch.ids().next().expect("id");
        let hash = batch.block_hash(&[0u8; 32]);

        sink.submit_batch(batch).await.expect("submit");
        sink.submit_block_hash(hash).await.expect("submit hash");

        assert!(sink.contains(&id));
        assert_eq!(sink.witness_count(), 1);
        assert_eq!(sink.block_hashes(), vec![hash]);
    }
}
