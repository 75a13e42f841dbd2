use std::net::SocketAddr;

use lockstep_netproto::{
    EngineType, Event, MessageType, Packet,
    constants::{EVENT_CMD_ISSUE, EVENT_READY, EVENT_SYNC},
};
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::net::inbound::ConnId;
use crate::net::outbound::send_packet;
use crate::proto_dispatch::error::{HandlerError, HandlerResult};
use crate::session::Session;

mod cmd_issue;
mod ping;
mod ready;
mod sync;

pub(crate) async fn dispatch_packet(
    session: &mut Session,
    conn_id: ConnId,
    peer: &SocketAddr,
    packet: Packet,
) {
    session.touch(conn_id);

    let res = match packet.engine {
        EngineType::Ping => ping::handle(session, conn_id).await,
        EngineType::Close => {
            close_connection(session, conn_id, "engine close");
            Ok(())
        }
        EngineType::Message => dispatch_message(session, conn_id, peer, &packet).await,
        EngineType::Pong | EngineType::Noop | EngineType::Open | EngineType::Upgrade => {
            trace!(conn_id, engine = ?packet.engine, "Engine packet ignored");
            Ok(())
        }
    };

    if let Err(e) = res {
        warn!(conn_id, %peer, error = %e, "Handler failed");
    }
}

async fn dispatch_message(
    session: &mut Session,
    conn_id: ConnId,
    peer: &SocketAddr,
    packet: &Packet,
) -> HandlerResult {
    match packet.message {
        Some(MessageType::Event) => {
            let event = Event::from_packet(packet)?;
            if let Some(id) = packet.id {
                let outbound = session
                    .peer(conn_id)
                    .ok_or_else(HandlerError::unknown_peer)?
                    .outbound
                    .clone();
                send_packet(&outbound, &Packet::ack(id, json!([]))).await?;
            }
            dispatch_event(session, conn_id, peer, &event).await
        }
        Some(MessageType::Disconnect) => {
            close_connection(session, conn_id, "namespace disconnect");
            Ok(())
        }
        Some(MessageType::Connect) | Some(MessageType::Ack) => {
            debug!(conn_id, message = ?packet.message, "Message ignored");
            Ok(())
        }
        other => {
            warn!(conn_id, %peer, message = ?other, "Unhandled message (ignored)");
            Ok(())
        }
    }
}

async fn dispatch_event(
    session: &mut Session,
    conn_id: ConnId,
    peer: &SocketAddr,
    event: &Event,
) -> HandlerResult {
    debug!(conn_id, event = %event.name, "Event received");
    match event.name.as_str() {
        EVENT_SYNC => sync::handle(session, conn_id, event).await,
        EVENT_READY => ready::handle(session, conn_id, event).await,
        EVENT_CMD_ISSUE => cmd_issue::handle(session, conn_id, event).await,
        _ => {
            warn!(conn_id, %peer, event = %event.name, "Unhandled event (ignored)");
            Ok(())
        }
    }
}

/// Ask the connection task to close. The peer is removed once its
/// `Disconnected` event comes back through the server loop.
fn close_connection(session: &Session, conn_id: ConnId, reason: &str) {
    if let Some(peer) = session.peer(conn_id) {
        debug!(conn_id, sid = %peer.sid, reason, "Closing connection");
        peer.cancel_token.cancel();
    }
}
