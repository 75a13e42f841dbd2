//! Lockstep peer library.
//!
//! A peer connects to the relay, estimates the host's clock, and runs every
//! command at the same shared tick as all other peers.
//!
//! # Architecture
//!
//! - [`transport`]: WebSocket connection with reconnects and keepalive, on a tokio runtime
//! - [`socket`]: named event handlers and acks, delivered by [`EventSocket::tick`]
//! - [`clock`]: local clocks and the offset/round-trip sample pools
//! - [`scheduler`]: pending commands and their execution triggers
//! - [`dispatch`]: command executors keyed by dispatcher tag
//! - [`audit`]: periodic state checksums sent to the relay
//! - [`peer`]: [`LockstepPeer`], tying the above together
//! - [`error`]: Error types

pub mod audit;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod peer;
pub mod scheduler;
pub mod socket;
pub mod transport;

// Re-export commonly used types
pub use clock::{ClockSync, FrameClock, LocalClock, MillisClock};
pub use config::PeerConfig;
pub use dispatch::{CommandExecutor, DispatchTable};
pub use error::LockstepError;
pub use lockstep_netproto::messages::Command;
pub use peer::LockstepPeer;
pub use socket::{EventSocket, HandlerId};
