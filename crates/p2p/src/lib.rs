//! Networking for the attestation node: catalogue negotiation, framed pipes
//! to single peers, and TCP discovery.
//!
//! Peers advertise what they can do as a catalogue bit mask, agree on one
//! complementary item, and hand the caller a [`Pipe`] to run it over.

mod catalogue;
mod codec;
mod config;
mod error;
mod handshake;
mod pipe;
mod provider;
mod types;

pub use catalogue::{
    CATALOGUE_LENGTH_IN_BYTES, CATALOGUE_SIZE_OF_PAYLOAD_BYTES, CATALOGUE_SIZE_OF_SIZE_BYTES,
    CatalogueItem, CatalogueSet, ProcedureCatalogue, StaticCatalogue, decode_catalogue_mask,
    encode_catalogue_mask, select_item,
};
pub use codec::{read_frame, write_frame};
pub use config::P2pConfig;
pub use error::{HandshakeError, NetworkError, PipeError};
pub use handshake::{NegotiationFrame, Negotiated, negotiate};
pub use pipe::{DisconnectCallback, DisconnectSubscription, Pipe, PipeInfo, StreamPipe};
pub use provider::{NetworkProvider, TcpNetworkProvider};
pub use types::{NetworkPeer, PeerId, PipeRole, RemotePeer};
