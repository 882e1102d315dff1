use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use crate::catalogue::{
    CATALOGUE_LENGTH_IN_BYTES, CatalogueItem, CatalogueSet, decode_catalogue_mask, select_item,
};
use crate::codec::{read_frame, write_frame};
use crate::error::{HandshakeError, NetworkError};
use crate::types::PipeRole;

/// First frame of a connection: `[size][catalogue mask][initiation data]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NegotiationFrame {
    pub catalogue: CatalogueSet,
    pub initiation_data: Vec<u8>,
}

impl NegotiationFrame {
    pub fn new(catalogue: CatalogueSet, initiation_data: Vec<u8>) -> Self {
        Self {
            catalogue,
            initiation_data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + CATALOGUE_LENGTH_IN_BYTES + self.initiation_data.len());
        out.push(CATALOGUE_LENGTH_IN_BYTES as u8);
        out.extend_from_slice(&self.catalogue.mask().to_be_bytes());
        out.extend_from_slice(&self.initiation_data);
        out
    }

    /// Parse a negotiation frame. A frame shorter than its declared
    /// catalogue size is treated as advertising nothing.
    pub fn decode(bytes: &[u8]) -> Self {
        let Some((&size, rest)) = bytes.split_first() else {
            debug!("malformed catalogue: empty negotiation frame");
            return Self::default();
        };
        let size = size as usize;
        if rest.len() < size {
            debug!(declared = size, available = rest.len(), "malformed catalogue");
            return Self::default();
        }
        let (mask, data) = rest.split_at(size);
        Self {
            catalogue: decode_catalogue_mask(mask),
            initiation_data: data.to_vec(),
        }
    }
}

/// Outcome of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub local_catalogue: CatalogueSet,
    pub other_catalogue: CatalogueSet,
    pub item: CatalogueItem,
    pub initiation_data: Option<Vec<u8>>,
}

/// Exchange catalogues over a fresh connection.
///
/// The initiator speaks first. The responder answers with its own catalogue,
/// or with an empty one when nothing matches, in which case both sides fail
/// with [`HandshakeError::NoCompatibleItem`].
pub async fn negotiate<S>(
    stream: &mut S,
    role: PipeRole,
    local: CatalogueSet,
    initiation_data: &[u8],
    max_len: usize,
    step_timeout: Duration,
) -> Result<Negotiated, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        PipeRole::Initiator => {
            let hello = NegotiationFrame::new(local, initiation_data.to_vec());
            send(stream, &hello, max_len, step_timeout).await?;
            let reply = expect_frame(stream, max_len, step_timeout).await?;
            let item = select_item(role, local, reply.catalogue)
                .ok_or(HandshakeError::NoCompatibleItem)?;
            Ok(Negotiated {
                local_catalogue: local,
                other_catalogue: reply.catalogue,
                item,
                initiation_data: None,
            })
        }
        PipeRole::Responder => {
            let hello = expect_frame(stream, max_len, step_timeout).await?;
            let Some(item) = select_item(role, local, hello.catalogue) else {
                let refusal = NegotiationFrame::default();
                send(stream, &refusal, max_len, step_timeout).await?;
                return Err(HandshakeError::NoCompatibleItem);
            };
            send(stream, &NegotiationFrame::new(local, Vec::new()), max_len, step_timeout).await?;
            Ok(Negotiated {
                local_catalogue: local,
                other_catalogue: hello.catalogue,
                item,
                initiation_data: (!hello.initiation_data.is_empty()).then_some(hello.initiation_data),
            })
        }
    }
}

async fn send<S>(
    stream: &mut S,
    frame: &NegotiationFrame,
    max_len: usize,
    step_timeout: Duration,
) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    timeout(step_timeout, write_frame(stream, &frame.encode(), max_len))
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .map_err(map_network_error)
}

async fn expect_frame<S>(
    stream: &mut S,
    max_len: usize,
    step_timeout: Duration,
) -> Result<NegotiationFrame, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let frame = timeout(step_timeout, read_frame(stream, max_len))
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .map_err(map_network_error)?
        .ok_or(HandshakeError::ConnectionClosed)?;
    Ok(NegotiationFrame::decode(&frame))
}

fn map_network_error(err: NetworkError) -> HandshakeError {
    match err {
        NetworkError::Io(io) => HandshakeError::Io(io),
        NetworkError::Handshake(inner) => inner,
        NetworkError::FrameTooLarge { len, max } => HandshakeError::FrameTooLarge { len, max },
        NetworkError::NoCompatiblePeer | NetworkError::Stopped => HandshakeError::ConnectionClosed,
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    const STEP: Duration = Duration::from_secs(2);

    fn set(mask: u32) -> CatalogueSet {
        CatalogueSet::from_mask(mask)
    }

    #[test]
    fn frame_layout_matches_wire_format() {
        let frame = NegotiationFrame::new(set(5), vec![0xaa]);
        assert_eq!(frame.encode(), vec![4, 0, 0, 0, 5, 0xaa]);
        assert_eq!(NegotiationFrame::decode(&frame.encode()), frame);
    }

    #[test]
    fn truncated_frames_advertise_nothing() {
        assert_eq!(NegotiationFrame::decode(&[]), NegotiationFrame::default());
        assert_eq!(NegotiationFrame::decode(&[4, 0, 0]), NegotiationFrame::default());
        let short = NegotiationFrame::decode(&[2, 0, 1]);
        assert!(short.catalogue.is_empty());
    }

    #[tokio::test]
    async fn negotiates_complementary_items() {
        let (mut client, mut server) = duplex(256);
        let initiator = tokio::spawn(async move {
            negotiate(&mut client, PipeRole::Initiator, set(0b101), b"hi", 1024, STEP).await
        });
        let responder = negotiate(&mut server, PipeRole::Responder, set(0b011), &[], 1024, STEP)
            .await
            .expect("responder");
        let initiator = initiator.await.expect("join").expect("initiator");

        assert_eq!(initiator.item, CatalogueItem::GiveOriginChain);
        assert_eq!(responder.item, CatalogueItem::TakeOriginChain);
        assert_eq!(initiator.other_catalogue, set(0b011));
        assert_eq!(responder.other_catalogue, set(0b101));
        assert_eq!(responder.initiation_data, Some(b"hi".to_vec()));
        assert_eq!(initiator.initiation_data, None);
    }

    #[tokio::test]
    async fn incompatible_catalogues_fail_on_both_sides() {
        let (mut client, mut server) = duplex(256);
        let take = CatalogueSet::empty().with(CatalogueItem::TakeOriginChain);
        let initiator = tokio::spawn(async move {
            negotiate(&mut client, PipeRole::Initiator, take, &[], 1024, STEP).await
        });
        let responder = negotiate(&mut server, PipeRole::Responder, take, &[], 1024, STEP).await;
        assert!(matches!(responder, Err(HandshakeError::NoCompatibleItem)));
        assert!(matches!(
            initiator.await.expect("join"),
            Err(HandshakeError::NoCompatibleItem)
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_client, mut server) = duplex(256);
        let result = negotiate(
            &mut server,
            PipeRole::Responder,
            set(1),
            &[],
            1024,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Timeout)));
    }

    #[tokio::test]
    async fn closed_peer_is_reported() {
        let (client, mut server) = duplex(256);
        drop(client);
        let result = negotiate(&mut server, PipeRole::Responder, set(1), &[], 1024, STEP).await;
        assert!(matches!(result, Err(HandshakeError::ConnectionClosed)));
    }
}
