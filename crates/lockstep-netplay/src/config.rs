use std::time::Duration;

use lockstep_netproto::constants::DEFAULT_AUDIT_INTERVAL;

/// Peer settings.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Number of clock samples kept; the peer is synchronized once full.
    pub sync_pool_size: usize,
    /// Time between clock probes.
    pub sync_interval: Duration,
    /// Pending acks older than this are dropped, oldest first.
    pub ack_expiration: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Wait between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Ticks between state audits.
    pub audit_interval: i64,
    /// Wall time of one lockstep tick, used to arm command triggers.
    pub tick_duration: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            sync_pool_size: 15,
            sync_interval: Duration::from_secs(1) / 15,
            ack_expiration: Duration::from_secs(1800),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(5),
            audit_interval: DEFAULT_AUDIT_INTERVAL,
            tick_duration: Duration::from_millis(1),
        }
    }
}
