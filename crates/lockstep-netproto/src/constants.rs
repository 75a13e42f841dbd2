/// Namespace assumed when a frame does not carry one.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Relay → peer: session random seed.
pub const EVENT_SEED: &str = "lockstep.io:seed";

/// Peer ↔ relay: clock probe and its reply.
pub const EVENT_SYNC: &str = "lockstep.io:sync";

/// Peer → relay readiness report, relay → all readiness table.
pub const EVENT_READY: &str = "lockstep.io:ready";

/// Peer → relay → all: scheduled command.
pub const EVENT_CMD_ISSUE: &str = "lockstep.io:cmd:issue";

/// Dispatcher tag reserved for state-sync (desync audit) commands.
/// Commands carrying it are aggregated by the relay and never rebroadcast.
pub const STATE_SYNC_DISPATCHER: u32 = 0;

/// Default tick interval between two state audits.
pub const DEFAULT_AUDIT_INTERVAL: i64 = 30;

/// The relay schedules commands this many round trips into the future.
pub const COMMAND_DELAY_ROUND_TRIPS: i64 = 3;

/// Largest text frame accepted from a connection, in bytes.
pub const MAX_TEXT_FRAME: usize = 1024 * 1024;
