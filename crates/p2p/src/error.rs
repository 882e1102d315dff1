use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("negotiation failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("no compatible peer found")]
    NoCompatiblePeer,
    #[error("network provider stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("connection closed during negotiation")]
    ConnectionClosed,
    #[error("no catalogue item in common")]
    NoCompatibleItem,
    #[error("timed out waiting for negotiation")]
    Timeout,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("pipe closed")]
    Closed,
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}
