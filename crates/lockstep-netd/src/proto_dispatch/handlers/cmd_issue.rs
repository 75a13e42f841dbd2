use lockstep_netproto::{Event, constants::STATE_SYNC_DISPATCHER, value::ValueExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::net::inbound::ConnId;
use crate::proto_dispatch::error::{HandlerError, HandlerResult};
use crate::session::{Session, broadcast::broadcast_event};

/// State-sync commands go to the desync ledger; everything else is relayed
/// unchanged to every peer, the issuer included.
pub(crate) async fn handle(session: &mut Session, conn_id: ConnId, event: &Event) -> HandlerResult {
    let dispatcher = event
        .data
        .as_ref()
        .and_then(|d| d.opt_i64_field("dispatcher").ok().flatten());

    if let (Some(tag), Some(data)) = (dispatcher, event.data.as_ref())
        && tag == i64::from(STATE_SYNC_DISPATCHER)
    {
        return record_state(session, conn_id, data);
    }

    debug!(conn_id, ?dispatcher, "Relaying command");
    broadcast_event(&session.outbounds(), event.clone()).await;
    Ok(())
}

fn record_state(session: &mut Session, conn_id: ConnId, data: &Value) -> HandlerResult {
    let tick = data.i64_field("lockstepTime")?;
    let hash = data.str_field("hash")?;
    let sid = session
        .peer(conn_id)
        .ok_or_else(HandlerError::unknown_peer)?
        .sid
        .clone();

    session.ledger_mut().record(tick, &sid, hash);

    let ledger = session.ledger();
    let Some(entry) = ledger.entry(tick) else {
        // Evicted immediately by a retention limit of zero.
        return Ok(());
    };

    if session.is_host_audit(conn_id, tick) {
        info!(tick, hashes = ?entry, "State audit");
    }
    if !ledger.is_consistent(tick) {
        warn!(tick, hashes = ?entry, "desync detected");
    }
    Ok(())
}
