use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use codec::BoundWitness;
use crypto::Signer;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use witness::{OriginHeuristics, WitnessError, WitnessHash};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("witness error: {0}")]
    Witness(#[from] WitnessError),
    #[error("witness does not name this node as a party")]
    NotAParty,
    #[error("witness claims origin index {found}, expected {expected}")]
    IndexMismatch { expected: u32, found: u32 },
    #[error("witness previous hash does not match the chain tip")]
    BrokenLink,
}

/// This node's own chain of bound witnesses.
///
/// Each witness the node takes part in carries the next index and the hash
/// of the previous witness in the node's signed payload. Stored witnesses
/// have their unsigned payloads removed.
pub struct OriginChain {
    signer: Arc<dyn Signer>,
    next_index: u32,
    previous_hash: Option<WitnessHash>,
    blocks: Vec<BoundWitness>,
}

impl OriginChain {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            next_index: 0,
            previous_hash: None,
            blocks: Vec::new(),
        }
    }

    pub fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    /// Heuristics the next witness must carry.
    pub fn heuristics(&self) -> OriginHeuristics {
        OriginHeuristics {
            index: self.next_index,
            previous_hash: self.previous_hash,
        }
    }

    pub fn height(&self) -> u32 {
        self.next_index
    }

    pub fn tip_hash(&self) -> Option<WitnessHash> {
        self.previous_hash
    }

    pub fn blocks(&self) -> &[BoundWitness] {
        &self.blocks
    }

    /// Append a completed witness and advance the chain.
    pub fn append(&mut self, witness: &BoundWitness) -> Result<WitnessHash, OriginError> {
        let party = witness
            .party_of(&self.public_key())
            .ok_or(OriginError::NotAParty)?;
        let claimed = witness
            .payloads
            .get(party)
            .and_then(OriginHeuristics::from_payload)
            .ok_or(OriginError::NotAParty)?;
        if claimed.index != self.next_index {
            return Err(OriginError::IndexMismatch {
                expected: self.next_index,
                found: claimed.index,
            });
        }
        if claimed.previous_hash != self.previous_hash {
            return Err(OriginError::BrokenLink);
        }
        let stored = witness.without_unsigned();
        let hash = WitnessHash::of(&stored)?;
        self.blocks.push(stored);
        self.next_index += 1;
        self.previous_hash = Some(hash);
        debug!(index = claimed.index, %hash, "origin chain advanced");
        Ok(hash)
    }
}

/// Witnesses waiting to be handed to the next taker.
#[derive(Debug)]
pub struct BridgeQueue {
    inner: Mutex<QueueState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    blocks: VecDeque<(WitnessHash, BoundWitness)>,
    known: HashSet<WitnessHash>,
}

impl BridgeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().blocks.is_empty()
    }

    /// Queue a witness with its unsigned payloads removed. Witnesses already
    /// queued are ignored; when full the oldest entry is dropped.
    pub fn push(&self, witness: &BoundWitness) -> Result<bool, WitnessError> {
        let stored = witness.without_unsigned();
        let hash = WitnessHash::of(&stored)?;
        let mut state = self.inner.lock();
        if !state.known.insert(hash) {
            return Ok(false);
        }
        if state.blocks.len() >= self.capacity {
            if let Some((dropped, _)) = state.blocks.pop_front() {
                state.known.remove(&dropped);
                warn!(%dropped, capacity = self.capacity, "bridge queue full, dropping oldest");
            }
        }
        state.blocks.push_back((hash, stored));
        Ok(true)
    }

    /// Remove up to `max` of the oldest witnesses for handing off.
    pub fn take(&self, max: usize) -> Vec<BoundWitness> {
        let mut state = self.inner.lock();
        let count = max.min(state.blocks.len());
        let taken: Vec<_> = state.blocks.drain(..count).collect();
        for (hash, _) in &taken {
            state.known.remove(hash);
        }
        taken.into_iter().map(|(_, witness)| witness).collect()
    }

    /// Put witnesses from a failed hand-off back at the front, in order.
    pub fn restore(&self, blocks: Vec<BoundWitness>) -> Result<(), WitnessError> {
        let mut hashed = Vec::with_capacity(blocks.len());
        for witness in blocks {
            hashed.push((WitnessHash::of(&witness)?, witness));
        }
        let mut state = self.inner.lock();
        for (hash, witness) in hashed.into_iter().rev() {
            if state.known.insert(hash) {
                state.blocks.push_front((hash, witness));
            }
        }
        while state.blocks.len() > self.capacity {
            if let Some((dropped, _)) = state.blocks.pop_back() {
                state.known.remove(&dropped);
            }
        }
        Ok(())
    }
}
