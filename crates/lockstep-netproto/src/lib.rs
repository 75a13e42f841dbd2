//! Lockstep wire protocol.
//!
//! Shared by the relay (`lockstep-netd`) and peers (`lockstep-netplay`).
//!
//! - [`packet`]: two-level packet model (engine type + message type).
//! - [`codec`]: text framing `<engine><message>[<attachments>-][<nsp>,][<id>]<json>`.
//! - [`event`]: `["name", {data}]` event envelope carried by message packets.
//! - [`messages`]: typed payloads for the fixed lockstep event set.
//! - [`value`]: typed accessors over untyped JSON values.
//! - [`checksum`]: order-sensitive rolling hash used for desync audits.

pub mod checksum;
pub mod codec;
pub mod constants;
pub mod error;
pub mod event;
pub mod messages;
pub mod packet;
pub mod value;

pub use codec::{Decoded, decode, encode};
pub use error::ProtoError;
pub use event::Event;
pub use packet::{EngineType, MessageType, Packet};
