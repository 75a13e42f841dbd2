//! Peer error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockstepError {
    #[error("not connected to server")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] lockstep_netproto::ProtoError),

    #[error("missed schedule: command for tick {at_lockstep} arrived at tick {lockstep_now}")]
    MissedSchedule { at_lockstep: i64, lockstep_now: i64 },

    #[error("command delay not known yet")]
    NoCommandDelay,

    #[error("unknown dispatcher {0}")]
    UnknownDispatcher(u32),

    #[error("peer halted after a fatal error")]
    Halted,

    #[error("channel send error")]
    ChannelSend,
}

impl LockstepError {
    /// Errors after which the peer's simulation can no longer stay in lockstep.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LockstepError::MissedSchedule { .. } | LockstepError::UnknownDispatcher(_)
        )
    }
}
