//! Handler error types.

use lockstep_netproto::ProtoError;
use thiserror::Error;

use crate::net::outbound::OutboundError;

/// Error returned by handlers. Logged by the dispatcher; never fatal to the
/// relay or to the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("bad message: {0}")]
    BadMessage(#[from] ProtoError),
    #[error("unknown peer")]
    UnknownPeer,
    #[error("send failed: {0}")]
    Outbound(#[from] OutboundError),
}

impl HandlerError {
    pub fn unknown_peer() -> Self {
        Self::UnknownPeer
    }
}

/// Convenient Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;
