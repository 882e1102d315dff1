//! Bound witness exchange over a negotiated pipe.
//!
//! Every catalogue item runs the same three-transfer exchange:
//!
//! 1. responder sends its key set and payload,
//! 2. initiator answers with its key set, payload and signature,
//! 3. responder sends its signature.
//!
//! The items only differ in what the local party puts in its payload and in
//! what is done with the finished witness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use codec::{BoundWitness, CodecError, Payload, TypedObject};
use crypto::Signer;
use p2p::{CatalogueItem, Pipe, PipeError, PipeRole, select_item};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use witness::{
    ExtractError, OriginHeuristics, WitnessError, ZigZag, extract_nested, verify_bound_witness,
};

pub const DEFAULT_INTERACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// The interactions a node can run; one per catalogue item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    BoundWitness,
    TakeOriginChain,
    GiveOriginChain,
}

impl InteractionKind {
    pub fn for_item(item: CatalogueItem) -> Self {
        match item {
            CatalogueItem::BoundWitness => InteractionKind::BoundWitness,
            CatalogueItem::TakeOriginChain => InteractionKind::TakeOriginChain,
            CatalogueItem::GiveOriginChain => InteractionKind::GiveOriginChain,
        }
    }

    pub fn catalogue_item(self) -> CatalogueItem {
        match self {
            InteractionKind::BoundWitness => CatalogueItem::BoundWitness,
            InteractionKind::TakeOriginChain => CatalogueItem::TakeOriginChain,
            InteractionKind::GiveOriginChain => CatalogueItem::GiveOriginChain,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionState {
    Negotiating,
    Active,
    Completed,
    Failed,
    PeerDisconnected,
}

#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("pipe has no negotiated catalogue item")]
    NoAgreedItem,
    #[error("pipe negotiated {negotiated} but interaction performs {expected}")]
    ItemMismatch {
        negotiated: CatalogueItem,
        expected: CatalogueItem,
    },
    #[error("peer disconnected")]
    PeerDisconnected,
    #[error("interaction timed out")]
    Timeout,
    #[error("pipe error: {0}")]
    Pipe(#[from] PipeError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("witness error: {0}")]
    Witness(#[from] WitnessError),
    #[error("bridged witness {index} failed verification: {source}")]
    InvalidBridgedWitness {
        index: usize,
        #[source]
        source: WitnessError,
    },
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),
    #[error("malformed transfer: {0}")]
    Malformed(&'static str),
}

impl InteractionError {
    /// Terminal state this error leaves the interaction in.
    pub fn state(&self) -> InteractionState {
        match self {
            InteractionError::PeerDisconnected | InteractionError::Pipe(PipeError::Closed) => {
                InteractionState::PeerDisconnected
            }
            _ => InteractionState::Failed,
        }
    }
}

/// Result of a completed interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionOutcome {
    pub kind: InteractionKind,
    pub witness: BoundWitness,
    /// Index of the local party within `witness`.
    pub party: usize,
    /// Witnesses bridged to us; only filled when taking an origin chain.
    pub extracted: Vec<BoundWitness>,
}

pub struct Interaction {
    kind: InteractionKind,
    signer: Arc<dyn Signer>,
    heuristics: OriginHeuristics,
    given: Vec<BoundWitness>,
    timeout: Duration,
    state: InteractionState,
}

impl Interaction {
    pub fn new(kind: InteractionKind, signer: Arc<dyn Signer>, heuristics: OriginHeuristics) -> Self {
        Self {
            kind,
            signer,
            heuristics,
            given: Vec::new(),
            timeout: DEFAULT_INTERACTION_TIMEOUT,
            state: InteractionState::Negotiating,
        }
    }

    /// Witnesses bridged in the unsigned payload when giving an origin chain.
    pub fn with_given(mut self, blocks: Vec<BoundWitness>) -> Self {
        self.given = blocks;
        self
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Drive the exchange to completion. On any failure no witness is
    /// returned and the state records why.
    pub async fn run(&mut self, pipe: &dyn Pipe) -> Result<InteractionOutcome, InteractionError> {
        self.state = InteractionState::Negotiating;
        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = disconnected.clone();
        let _subscription = pipe.on_peer_disconnect(Box::new(move |_| {
            flag.store(true, Ordering::SeqCst);
        }));

        let result = match self.check_negotiated(pipe) {
            Ok(()) => {
                self.state = InteractionState::Active;
                match timeout(self.timeout, self.exchange(pipe)).await {
                    Ok(result) => result,
                    Err(_) => Err(InteractionError::Timeout),
                }
            }
            Err(err) => Err(err),
        };
        let result = match result {
            Err(err @ (InteractionError::Witness(_) | InteractionError::InvalidBridgedWitness { .. })) => {
                Err(err)
            }
            Err(err) if disconnected.load(Ordering::SeqCst) => {
                debug!(error = %err, "peer went away mid interaction");
                Err(InteractionError::PeerDisconnected)
            }
            other => other,
        };
        self.state = match &result {
            Ok(_) => InteractionState::Completed,
            Err(err) => err.state(),
        };
        result
    }

    fn check_negotiated(&self, pipe: &dyn Pipe) -> Result<(), InteractionError> {
        let other = pipe.other_catalogue().ok_or(InteractionError::NoAgreedItem)?;
        let negotiated = select_item(pipe.role(), pipe.local_catalogue(), other)
            .ok_or(InteractionError::NoAgreedItem)?;
        let expected = self.kind.catalogue_item();
        if negotiated != expected {
            return Err(InteractionError::ItemMismatch {
                negotiated,
                expected,
            });
        }
        Ok(())
    }

    fn payload(&self) -> Payload {
        let mut unsigned = Vec::new();
        if self.kind == InteractionKind::GiveOriginChain && !self.given.is_empty() {
            unsigned.push(TypedObject::BridgeBlockSet(
                self.given.iter().cloned().map(TypedObject::from).collect(),
            ));
        }
        Payload::new(self.heuristics.signed_items(), unsigned)
    }

    async fn exchange(&self, pipe: &dyn Pipe) -> Result<InteractionOutcome, InteractionError> {
        let (witness, party) = match pipe.role() {
            PipeRole::Responder => self.respond(pipe).await?,
            PipeRole::Initiator => self.initiate(pipe).await?,
        };
        let extracted = match self.kind {
            InteractionKind::TakeOriginChain => extract_nested(&witness)?
                .into_iter()
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        debug!(
            kind = ?self.kind,
            parties = witness.party_count(),
            extracted = extracted.len(),
            "bound witness completed"
        );
        Ok(InteractionOutcome {
            kind: self.kind,
            witness,
            party,
            extracted,
        })
    }

    async fn respond(&self, pipe: &dyn Pipe) -> Result<(BoundWitness, usize), InteractionError> {
        let signer = self.signer.as_ref();
        let mut zigzag = ZigZag::new();
        let party = zigzag.add_party(signer, self.payload());

        let reply = pipe
            .send(encode_fragment(zigzag.parties_from(0))?, true)
            .await?
            .ok_or(InteractionError::PeerDisconnected)?;
        let fragment = decode_fragment(&reply)?;
        self.check_bridged(&fragment)?;
        zigzag.receive(fragment)?;
        if zigzag.party_count() != 2 {
            return Err(InteractionError::Malformed("expected exactly one remote party"));
        }
        zigzag.verify_party(1)?;

        zigzag.sign(party, signer)?;
        let signature = zigzag.signature_of(party)?;
        pipe.send(encode_fragment(signature)?, false).await?;
        Ok((zigzag.finish()?, party))
    }

    async fn initiate(&self, pipe: &dyn Pipe) -> Result<(BoundWitness, usize), InteractionError> {
        let signer = self.signer.as_ref();
        let mut zigzag = ZigZag::new();

        let opening = pipe.receive().await?.ok_or(InteractionError::PeerDisconnected)?;
        let fragment = decode_fragment(&opening)?;
        self.check_bridged(&fragment)?;
        zigzag.receive(fragment)?;
        if zigzag.party_count() != 1 {
            return Err(InteractionError::Malformed("expected exactly one remote party"));
        }

        let party = zigzag.add_party(signer, self.payload());
        zigzag.sign(party, signer)?;
        let reply = pipe
            .send(encode_fragment(zigzag.parties_from(party))?, true)
            .await?
            .ok_or(InteractionError::PeerDisconnected)?;
        zigzag.receive(decode_fragment(&reply)?)?;
        zigzag.verify_party(0)?;
        Ok((zigzag.finish()?, party))
    }

    /// A taker refuses to sign over bridged witnesses that do not verify.
    fn check_bridged(&self, fragment: &BoundWitness) -> Result<(), InteractionError> {
        if self.kind != InteractionKind::TakeOriginChain {
            return Ok(());
        }
        for (index, nested) in extract_nested(fragment)?.into_iter().enumerate() {
            verify_bound_witness(nested)
                .map_err(|source| InteractionError::InvalidBridgedWitness { index, source })?;
        }
        Ok(())
    }
}

fn encode_fragment(fragment: BoundWitness) -> Result<Vec<u8>, CodecError> {
    codec::encode(&TypedObject::BoundWitness(fragment))
}

fn decode_fragment(bytes: &[u8]) -> Result<BoundWitness, InteractionError> {
    match codec::decode(bytes)? {
        TypedObject::BoundWitness(fragment) => Ok(fragment),
        _ => Err(InteractionError::Malformed("transfer is not a bound witness")),
    }
}
