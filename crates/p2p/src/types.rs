use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Temporary identifier of a remote peer.
///
/// Derived from the remote IP address, so it stays the same across
/// reconnects from one host but carries no cryptographic identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 8]);

impl PeerId {
    pub fn from_ip(ip: IpAddr) -> Self {
        let octets = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        let digest = blake3::hash(&octets);
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest.as_bytes()[..8]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Something on the other end of a pipe.
pub trait NetworkPeer: Send + Sync + fmt::Debug {
    fn temporary_peer_id(&self) -> PeerId;
}

/// Peer reached over a socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePeer {
    id: PeerId,
    addr: SocketAddr,
}

impl RemotePeer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: PeerId::from_ip(addr.ip()),
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl NetworkPeer for RemotePeer {
    fn temporary_peer_id(&self) -> PeerId {
        self.id
    }
}

impl fmt::Display for RemotePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipeRole {
    Initiator,
    Responder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_ignores_port() {
        let first = RemotePeer::new("10.0.0.7:4000".parse().expect("addr"));
        let second = RemotePeer::new("10.0.0.7:5123".parse().expect("addr"));
        let other = RemotePeer::new("10.0.0.8:4000".parse().expect("addr"));
        assert_eq!(first.temporary_peer_id(), second.temporary_peer_id());
        assert_ne!(first.temporary_peer_id(), other.temporary_peer_id());
    }

    #[test]
    fn mapped_and_plain_ipv4_agree() {
        let plain: IpAddr = "192.168.1.1".parse().expect("ip");
        let mapped: IpAddr = "::ffff:192.168.1.1".parse().expect("ip");
        assert_eq!(PeerId::from_ip(plain), PeerId::from_ip(mapped));
        assert_eq!(PeerId::from_ip(plain).to_string().len(), 16);
    }
}
