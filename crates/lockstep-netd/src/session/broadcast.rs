//! Event fan-out to connected peers.

use lockstep_netproto::{Event, encode};
use tracing::debug;

use crate::net::outbound::OutboundTx;

/// Encode `event` once and send it to every recipient.
///
/// Awaits backpressure on each queue; a closed queue belongs to a peer whose
/// disconnect is already in flight and is skipped.
pub async fn broadcast_event(recipients: &[OutboundTx], event: Event) {
    let frame = encode(&event.into_packet(None));
    for tx in recipients {
        if tx.send(frame.clone()).await.is_err() {
            debug!("Broadcast skipped closed connection");
        }
    }
}
