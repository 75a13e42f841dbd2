use lockstep_netproto::{Event, messages::ReadyReport};
use tracing::info;

use crate::net::inbound::ConnId;
use crate::proto_dispatch::error::{HandlerError, HandlerResult};
use crate::session::{Session, broadcast::broadcast_event};

pub(crate) async fn handle(session: &mut Session, conn_id: ConnId, event: &Event) -> HandlerResult {
    let report: ReadyReport = event.decode()?;
    let table = session
        .record_ready(conn_id, report)
        .ok_or_else(HandlerError::unknown_peer)?;

    info!(
        conn_id,
        round_trip = report.round_trip,
        offset = report.offset,
        command_delay = table.command_delay,
        ready = table.clients.len(),
        "Peer ready"
    );

    broadcast_event(&session.outbounds(), Event::encode(&table)?).await;
    Ok(())
}
