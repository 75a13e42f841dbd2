//! Lockstep relay server library - main loop logic extracted for testing.
//!
//! The network layer ([`net`]) turns WebSocket connections into
//! [`InboundEvent`]s on one channel; [`run_server`] owns the [`Session`] and
//! handles each event to completion before taking the next.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lockstep_netproto::constants::DEFAULT_AUDIT_INTERVAL;
use tokio::sync::mpsc;
use tracing::info;

use crate::net::inbound::{ConnId, InboundEvent};
use crate::proto_dispatch::handlers::dispatch_packet;
use crate::session::Session;

// Export modules publicly for testing
pub mod net;
pub mod proto_dispatch;
pub mod session;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Advertised to peers in the handshake.
    pub ping_interval: Duration,
    /// Advertised to peers in the handshake.
    pub ping_timeout: Duration,
    /// Ticks between state audits; used to pick which ledger entries to log.
    pub audit_interval: i64,
    /// Command delay before any readiness report raises it.
    pub initial_command_delay: i64,
    /// Most recent ledger ticks to keep. `None` keeps everything.
    pub ledger_retention: Option<usize>,
    /// Fixed session seed. Random in `0..10000` when unset.
    pub seed: Option<i64>,
    /// How often to look for peers that went silent.
    pub idle_check_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            audit_interval: DEFAULT_AUDIT_INTERVAL,
            initial_command_delay: 0,
            ledger_retention: None,
            seed: None,
            idle_check_interval: Duration::from_secs(5),
        }
    }
}

/// Run the server main loop until every inbound sender is dropped.
pub async fn run_server(mut rx: mpsc::Receiver<InboundEvent>, config: RelayConfig) -> anyhow::Result<()> {
    let mut session = Session::new(&config);
    let mut idle_timer = tokio::time::interval(config.idle_check_interval);

    info!("Relay main loop started");

    loop {
        tokio::select! {
            ev = rx.recv() => {
                let Some(ev) = ev else {
                    break;
                };
                match ev {
                    InboundEvent::Connected {
                        conn_id,
                        peer,
                        outbound,
                        cancel_token,
                    } => {
                        session.on_connect(conn_id, peer, outbound, cancel_token).await;
                    }

                    InboundEvent::Disconnected { conn_id, peer, reason } => {
                        handle_disconnected(&mut session, conn_id, peer, &reason);
                    }

                    InboundEvent::Packet { conn_id, peer, packet } => {
                        if session.peer(conn_id).is_some() {
                            dispatch_packet(&mut session, conn_id, &peer, packet).await;
                        }
                    }
                }
            }
            _ = idle_timer.tick() => {
                for conn_id in session.idle_peers(Instant::now()) {
                    if let Some(peer) = session.peer(conn_id) {
                        info!(conn_id, sid = %peer.sid, "Disconnecting idle connection");
                        peer.cancel_token.cancel();
                    }
                }
            }
        }
    }

    info!("Relay main loop stopped");
    Ok(())
}

fn handle_disconnected(session: &mut Session, conn_id: ConnId, peer: SocketAddr, reason: &str) {
    if let Some(p) = session.on_disconnect(conn_id) {
        p.cancel_token.cancel();
    }
    info!(conn_id, %peer, %reason, "Client disconnected");
}
