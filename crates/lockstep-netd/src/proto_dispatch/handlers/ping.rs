use lockstep_netproto::{EngineType, Packet};

use crate::net::inbound::ConnId;
use crate::net::outbound::send_packet;
use crate::proto_dispatch::error::{HandlerError, HandlerResult};
use crate::session::Session;

pub(crate) async fn handle(session: &Session, conn_id: ConnId) -> HandlerResult {
    let peer = session
        .peer(conn_id)
        .ok_or_else(HandlerError::unknown_peer)?;
    send_packet(&peer.outbound, &Packet::control(EngineType::Pong)).await?;
    Ok(())
}
