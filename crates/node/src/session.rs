use std::sync::Arc;
use std::time::Duration;

use codec::BoundWitness;
use consensus::{BatchBuilder, ConsensusError, ConsensusSink};
use crypto::Signer;
use p2p::{NetworkError, NetworkProvider, Pipe, ProcedureCatalogue, select_item};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use witness::WitnessError;

use crate::catalogue::{NodeRole, RoleCatalogue};
use crate::cfg::NodeConfig;
use crate::interaction::{Interaction, InteractionError, InteractionKind, InteractionOutcome};
use crate::origin::{BridgeQueue, OriginChain, OriginError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("interaction failed: {0}")]
    Interaction(#[from] InteractionError),
    #[error("origin chain error: {0}")]
    Origin(#[from] OriginError),
    #[error("witness error: {0}")]
    Witness(#[from] WitnessError),
    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    #[error("node is busy with another interaction")]
    Busy,
}

/// Shared state of a running node. Cloning is cheap; clones drive the same
/// origin chain.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    role: NodeRole,
    origin: Mutex<OriginChain>,
    queue: Arc<BridgeQueue>,
    catalogue: Arc<RoleCatalogue>,
    consensus: Arc<dyn ConsensusSink>,
    batches: Mutex<BatchBuilder>,
    last_block_hash: Mutex<[u8; 32]>,
    // Block hash of a batch the sink accepted whose hash it then refused.
    unsent_block_hash: Mutex<Option<[u8; 32]>>,
    flushing: AsyncMutex<()>,
    // Held for a whole interaction so origin indices are handed out in order.
    // Pipes arriving while it is held are closed, not queued.
    turn: AsyncMutex<()>,
    interaction_timeout: Duration,
    handoff_batch: usize,
    consensus_batch_size: usize,
}

impl Node {
    pub fn new(config: &NodeConfig, signer: Arc<dyn Signer>, consensus: Arc<dyn ConsensusSink>) -> Self {
        let queue = Arc::new(BridgeQueue::new(config.bridge_queue_capacity));
        let catalogue = Arc::new(RoleCatalogue::new(config.role, queue.clone()));
        Self {
            inner: Arc::new(NodeInner {
                role: config.role,
                origin: Mutex::new(OriginChain::new(signer)),
                queue,
                catalogue,
                consensus,
                batches: Mutex::new(BatchBuilder::with_dedup_window(
                    config.consensus_batch_size,
                    config.consensus_dedup_window,
                )),
                last_block_hash: Mutex::new([0u8; 32]),
                unsent_block_hash: Mutex::new(None),
                flushing: AsyncMutex::new(()),
                turn: AsyncMutex::new(()),
                interaction_timeout: config.interaction_timeout,
                handoff_batch: config.bridge_handoff_batch.max(1),
                consensus_batch_size: config.consensus_batch_size.max(1),
            }),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.inner.role
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.inner.origin.lock().public_key()
    }

    pub fn catalogue(&self) -> Arc<dyn ProcedureCatalogue> {
        self.inner.catalogue.clone()
    }

    pub fn queue(&self) -> &BridgeQueue {
        &self.inner.queue
    }

    pub fn height(&self) -> u32 {
        self.inner.origin.lock().height()
    }

    /// Copy of the stored origin chain.
    pub fn chain(&self) -> Vec<BoundWitness> {
        self.inner.origin.lock().blocks().to_vec()
    }

    pub fn pending_consensus(&self) -> usize {
        self.inner.batches.lock().pending()
    }

    /// Find a peer through `provider` and run one interaction with it.
    pub async fn interact_once(
        &self,
        provider: &dyn NetworkProvider,
    ) -> Result<InteractionOutcome, NodeError> {
        let pipe = provider.find(self.catalogue()).await?;
        self.handle_pipe(pipe).await
    }

    /// Run the interaction agreed on `pipe`, record the result and close
    /// the pipe. Fails with [`NodeError::Busy`] while another interaction
    /// is running.
    pub async fn handle_pipe(&self, pipe: Box<dyn Pipe>) -> Result<InteractionOutcome, NodeError> {
        let Ok(_turn) = self.inner.turn.try_lock() else {
            debug!(peer = %pipe.peer().temporary_peer_id(), "busy, closing pipe");
            pipe.close().await;
            return Err(NodeError::Busy);
        };
        let result = self.interact(pipe.as_ref()).await;
        pipe.close().await;
        result
    }

    async fn interact(&self, pipe: &dyn Pipe) -> Result<InteractionOutcome, NodeError> {
        let peer = pipe.peer().temporary_peer_id();
        let item = pipe
            .other_catalogue()
            .and_then(|other| select_item(pipe.role(), pipe.local_catalogue(), other))
            .ok_or(InteractionError::NoAgreedItem)?;
        let kind = InteractionKind::for_item(item);

        let given = match kind {
            InteractionKind::GiveOriginChain => self.inner.queue.take(self.inner.handoff_batch),
            _ => Vec::new(),
        };
        let (signer, heuristics) = {
            let origin = self.inner.origin.lock();
            (origin.signer(), origin.heuristics())
        };
        let mut interaction = Interaction::new(kind, signer, heuristics)
            .with_given(given.clone())
            .with_timeout(self.inner.interaction_timeout);

        let outcome = match interaction.run(pipe).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%peer, %item, state = ?interaction.state(), error = %err, "interaction failed");
                if !given.is_empty() {
                    self.inner.queue.restore(given)?;
                }
                return Err(err.into());
            }
        };

        let hash = self.inner.origin.lock().append(&outcome.witness)?;
        self.record(&outcome)?;
        info!(
            %peer,
            %item,
            role = %self.inner.role,
            index = heuristics.index,
            %hash,
            given = given.len(),
            taken = outcome.extracted.len(),
            "interaction completed"
        );

        if self.inner.role == NodeRole::Archivist
            && self.pending_consensus() >= self.inner.consensus_batch_size
        {
            if let Err(err) = self.flush_consensus().await {
                warn!(error = %err, pending = self.pending_consensus(), "consensus flush failed");
            }
        }
        Ok(outcome)
    }

    fn record(&self, outcome: &InteractionOutcome) -> Result<(), NodeError> {
        match self.inner.role {
            NodeRole::Sentinel => {
                self.inner.queue.push(&outcome.witness)?;
            }
            NodeRole::Bridge => {
                for witness in &outcome.extracted {
                    self.inner.queue.push(witness)?;
                }
            }
            NodeRole::Archivist => {
                let mut batches = self.inner.batches.lock();
                for witness in &outcome.extracted {
                    batches.push(witness.without_unsigned())?;
                }
                batches.push(outcome.witness.without_unsigned())?;
            }
        }
        Ok(())
    }

    /// Submit everything collected for consensus, one block hash per
    /// batch. Returns the number of witnesses submitted.
    ///
    /// A batch the sink refuses goes back to the front of the queue together
    /// with every batch after it, and the block hash chain only advances past
    /// batches whose hash was accepted.
    pub async fn flush_consensus(&self) -> Result<usize, NodeError> {
        let _flushing = self.inner.flushing.lock().await;
        let unsent = *self.inner.unsent_block_hash.lock();
        if let Some(block_hash) = unsent {
            self.inner.consensus.submit_block_hash(block_hash).await?;
            *self.inner.last_block_hash.lock() = block_hash;
            *self.inner.unsent_block_hash.lock() = None;
            debug!("resubmitted pending block hash");
        }

        let mut batches = self.inner.batches.lock().drain_batches().into_iter();
        let mut submitted = 0;
        while let Some(batch) = batches.next() {
            let previous = *self.inner.last_block_hash.lock();
            let block_hash = batch.block_hash(&previous);
            let count = batch.len();
            if let Err(err) = self.inner.consensus.submit_batch(batch.clone()).await {
                let unsent: Vec<_> = std::iter::once(batch).chain(batches).collect();
                self.inner.batches.lock().restore(unsent);
                return Err(err.into());
            }
            submitted += count;
            if let Err(err) = self.inner.consensus.submit_block_hash(block_hash).await {
                *self.inner.unsent_block_hash.lock() = Some(block_hash);
                self.inner.batches.lock().restore(batches.collect());
                return Err(err.into());
            }
            *self.inner.last_block_hash.lock() = block_hash;
            debug!(witnesses = count, "witness batch submitted");
        }
        if submitted > 0 {
            info!(witnesses = submitted, "submitted witnesses to consensus");
        }
        Ok(submitted)
    }
}
