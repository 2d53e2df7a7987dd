use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::message::MessageError;

/// Frame layout, sealing and opening.
pub mod frame;

/// One frame out, one frame back, over a fresh TCP connection.
pub mod transport;

/// Every variant is fatal to the exchange it happened in.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Message of {len} bytes does not fit in a frame")]
    MessageTooLong { len: usize },
    #[error("Failed to connect to bank at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Transport failed: {0}")]
    Io(#[from] io::Error),
    #[error("Timed out waiting for a frame")]
    Timeout,
    #[error("Received a truncated frame of {len} bytes")]
    Truncated { len: usize },
    #[error("Frame failed authentication")]
    IntegrityViolation,
    #[error("Authenticated frame has a malformed plaintext")]
    Malformed,
    #[error("Frame nonce does not belong to this exchange")]
    NonceMismatch,
    #[error("Frame nonce was already used")]
    Replay,
    #[error(transparent)]
    Payload(#[from] MessageError),
}
