use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime configuration for discovery and pipes.
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Address on which to accept inbound peers. `None` runs dial-only.
    pub listen: Option<SocketAddr>,
    /// Peers dialed repeatedly while the provider runs.
    pub seeds: Vec<SocketAddr>,
    /// Maximum bytes per frame.
    pub max_message_size: usize,
    /// Frames buffered per direction on a pipe.
    pub queue_depth: usize,
    /// Bound on each negotiation step.
    pub handshake_timeout: Duration,
    /// Pause between dials of the same seed.
    pub dial_interval: Duration,
    /// Give up on `find` after this long.
    pub find_timeout: Option<Duration>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen: Some(SocketAddr::from((Ipv4Addr::LOCALHOST, 11000))),
            seeds: Vec::new(),
            max_message_size: 4 * 1024 * 1024,
            queue_depth: 64,
            handshake_timeout: Duration::from_secs(10),
            dial_interval: Duration::from_secs(5),
            find_timeout: None,
        }
    }
}
