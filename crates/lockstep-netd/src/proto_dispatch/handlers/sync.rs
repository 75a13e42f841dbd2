use lockstep_netproto::{Event, messages::SyncRequest};
use tracing::debug;

use crate::net::inbound::ConnId;
use crate::net::outbound::send_event;
use crate::proto_dispatch::error::{HandlerError, HandlerResult};
use crate::session::Session;

pub(crate) async fn handle(session: &mut Session, conn_id: ConnId, event: &Event) -> HandlerResult {
    let probe: SyncRequest = event.decode()?;
    let peer = session
        .peer(conn_id)
        .ok_or_else(HandlerError::unknown_peer)?;

    match session.sync_reply(conn_id, probe.t0) {
        Some(reply) => send_event(&peer.outbound, &reply).await?,
        None => debug!(
            conn_id,
            sid = %peer.sid,
            t0 = probe.t0,
            "No host time available; probe unanswered"
        ),
    }
    Ok(())
}
