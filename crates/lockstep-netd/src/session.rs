//! Session registry.
//!
//! One session per relay: the set of connected peers, the host (first peer
//! to connect), the agreed command delay and the desync ledger. Owned by
//! the server loop; nothing here is shared across tasks.

pub mod broadcast;
pub mod ledger;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lockstep_netproto::{
    MessageType, Packet,
    codec::encode_open,
    constants::COMMAND_DELAY_ROUND_TRIPS,
    messages::{Handshake, ReadyReport, ReadyTable, Seed, SyncReply},
};
use rand::{Rng, distr::Alphanumeric};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::RelayConfig;
use crate::net::inbound::ConnId;
use crate::net::outbound::{OutboundError, OutboundTx, send_event, send_frame, send_packet};
use ledger::DesyncLedger;

const SID_LEN: usize = 20;
const SEED_RANGE: std::ops::Range<i64> = 0..10_000;

/// A connected peer.
#[derive(Debug)]
pub struct Peer {
    pub conn_id: ConnId,
    /// Public peer id; key of every peer-facing table.
    pub sid: String,
    pub addr: SocketAddr,
    pub outbound: OutboundTx,
    pub cancel_token: CancellationToken,
    pub last_ready: Option<ReadyReport>,
    /// Last time a frame arrived from this peer.
    pub last_activity: Instant,
}

#[derive(Debug)]
pub struct Session {
    peers: BTreeMap<ConnId, Peer>,
    host: Option<ConnId>,
    /// Never decreases.
    command_delay: i64,
    random_seed: i64,
    audit_interval: i64,
    ping_interval: Duration,
    ping_timeout: Duration,
    ledger: DesyncLedger,
}

impl Session {
    pub fn new(config: &RelayConfig) -> Self {
        let random_seed = config
            .seed
            .unwrap_or_else(|| rand::rng().random_range(SEED_RANGE));
        info!(random_seed, "Session created");
        Self {
            peers: BTreeMap::new(),
            host: None,
            command_delay: config.initial_command_delay,
            random_seed,
            audit_interval: config.audit_interval,
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
            ledger: DesyncLedger::new(config.ledger_retention),
        }
    }

    /// Register a new connection: assign a sid, make it host if there is
    /// none, then send the handshake and the session seed.
    pub async fn on_connect(
        &mut self,
        conn_id: ConnId,
        addr: SocketAddr,
        outbound: OutboundTx,
        cancel_token: CancellationToken,
    ) -> String {
        let sid = self.fresh_sid();

        if self.host.is_none() {
            self.host = Some(conn_id);
            info!(conn_id, %sid, "Host assigned");
        }

        if let Err(e) = self.send_handshake(&outbound, &sid).await {
            warn!(conn_id, %sid, error = %e, "Failed to send handshake");
        }

        self.peers.insert(
            conn_id,
            Peer {
                conn_id,
                sid: sid.clone(),
                addr,
                outbound,
                cancel_token,
                last_ready: None,
                last_activity: Instant::now(),
            },
        );
        info!(conn_id, %sid, %addr, peers = self.peers.len(), "Peer joined");
        sid
    }

    /// Remove a peer. A departing host leaves the session without a host;
    /// nobody is promoted.
    pub fn on_disconnect(&mut self, conn_id: ConnId) -> Option<Peer> {
        let peer = self.peers.remove(&conn_id)?;
        if self.host == Some(conn_id) {
            self.host = None;
            warn!(conn_id, sid = %peer.sid, "Host left; session has no host");
        }
        info!(conn_id, sid = %peer.sid, peers = self.peers.len(), "Peer left");
        Some(peer)
    }

    pub fn touch(&mut self, conn_id: ConnId) {
        if let Some(peer) = self.peers.get_mut(&conn_id) {
            peer.last_activity = Instant::now();
        }
    }

    /// Peers silent for longer than one ping interval plus the ping timeout.
    pub fn idle_peers(&self, now: Instant) -> Vec<ConnId> {
        let max_idle = self.ping_interval + self.ping_timeout;
        self.peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_activity) > max_idle)
            .map(|p| p.conn_id)
            .collect()
    }

    pub fn peer(&self, conn_id: ConnId) -> Option<&Peer> {
        self.peers.get(&conn_id)
    }

    pub fn host(&self) -> Option<&Peer> {
        self.host.and_then(|id| self.peers.get(&id))
    }

    pub fn is_host(&self, conn_id: ConnId) -> bool {
        self.host == Some(conn_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn command_delay(&self) -> i64 {
        self.command_delay
    }

    pub fn random_seed(&self) -> i64 {
        self.random_seed
    }

    pub fn audit_interval(&self) -> i64 {
        self.audit_interval
    }

    /// Whether a state report from `conn_id` for `tick` is the host's audit
    /// for that tick. Always false with a non-positive interval.
    pub fn is_host_audit(&self, conn_id: ConnId, tick: i64) -> bool {
        self.audit_interval > 0 && self.is_host(conn_id) && tick % self.audit_interval == 0
    }

    pub fn ledger(&self) -> &DesyncLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut DesyncLedger {
        &mut self.ledger
    }

    /// Outbound queues of every connected peer.
    pub fn outbounds(&self) -> Vec<OutboundTx> {
        self.peers.values().map(|p| p.outbound.clone()).collect()
    }

    /// Reply to a clock probe from `conn_id`.
    ///
    /// The host is its own reference (`t1 = t0`). Anyone else gets the
    /// host's last reported local time; `None` while the host is absent or
    /// has not reported readiness yet.
    pub fn sync_reply(&self, conn_id: ConnId, t0: i64) -> Option<SyncReply> {
        if self.is_host(conn_id) {
            return Some(SyncReply { t0, t1: t0 });
        }
        let host_now = self.host()?.last_ready?.local_now;
        Some(SyncReply { t0, t1: host_now })
    }

    /// Store a readiness report and raise the command delay to cover three
    /// of the reporter's round trips. Returns the table to broadcast.
    pub fn record_ready(&mut self, conn_id: ConnId, report: ReadyReport) -> Option<ReadyTable> {
        let peer = self.peers.get_mut(&conn_id)?;
        peer.last_ready = Some(report);

        let wanted = report.round_trip.saturating_mul(COMMAND_DELAY_ROUND_TRIPS);
        if wanted > self.command_delay {
            debug!(conn_id, from = self.command_delay, to = wanted, "Command delay raised");
            self.command_delay = wanted;
        }
        Some(self.ready_table())
    }

    /// Readiness table over peers that have reported.
    pub fn ready_table(&self) -> ReadyTable {
        ReadyTable {
            command_delay: self.command_delay,
            clients: self
                .peers
                .values()
                .filter_map(|p| p.last_ready.map(|r| (p.sid.clone(), r)))
                .collect(),
        }
    }

    /// Engine `open`, namespace connect, then the session seed.
    async fn send_handshake(&self, outbound: &OutboundTx, sid: &str) -> Result<(), OutboundError> {
        let handshake = Handshake {
            sid: sid.to_string(),
            upgrades: Vec::new(),
            ping_interval: self.ping_interval.as_millis() as u64,
            ping_timeout: self.ping_timeout.as_millis() as u64,
        };
        send_frame(outbound, encode_open(&handshake)?).await?;
        send_packet(outbound, &Packet::message(MessageType::Connect, None)).await?;
        send_event(
            outbound,
            &Seed {
                random_seed: self.random_seed,
            },
        )
        .await
    }

    fn fresh_sid(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let sid: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(SID_LEN)
                .map(char::from)
                .collect();
            if !self.peers.values().any(|p| p.sid == sid) {
                return sid;
            }
        }
    }
}
