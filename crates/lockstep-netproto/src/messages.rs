//! Typed payloads for the fixed lockstep event set.
//!
//! All field names are camelCase on the wire.

use std::{collections::BTreeMap, fmt::Write as _};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::constants::{
    EVENT_CMD_ISSUE, EVENT_READY, EVENT_SEED, EVENT_SYNC, STATE_SYNC_DISPATCHER,
};

/// A payload bound to one event name.
pub trait EventPayload: Serialize + DeserializeOwned {
    const EVENT: &'static str;
}

/// Engine `open` handshake sent by the relay on accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds.
    pub ping_interval: u64,
    /// Milliseconds.
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    pub random_seed: i64,
}

impl EventPayload for Seed {
    const EVENT: &'static str = EVENT_SEED;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub t0: i64,
}

impl EventPayload for SyncRequest {
    const EVENT: &'static str = EVENT_SYNC;
}

/// `t0` echoes the probe; `t1` is the host's local time (or `t0` itself
/// when the probing peer is the host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReply {
    pub t0: i64,
    pub t1: i64,
}

impl EventPayload for SyncReply {
    const EVENT: &'static str = EVENT_SYNC;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyReport {
    pub local_now: i64,
    pub offset: i64,
    pub round_trip: i64,
    pub lockstep: i64,
}

impl EventPayload for ReadyReport {
    const EVENT: &'static str = EVENT_READY;
}

/// Relay broadcast after every readiness report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyTable {
    pub command_delay: i64,
    #[serde(default)]
    pub clients: BTreeMap<String, ReadyReport>,
}

impl EventPayload for ReadyTable {
    const EVENT: &'static str = EVENT_READY;
}

impl ReadyTable {
    /// Fixed-width diagnostic table: one row per ready peer, sid shortened
    /// to its first eight characters.
    pub fn render(&self) -> String {
        let w = 13;
        let mut out = format!(
            "{:>w$} {:>w$} {:>w$} {:>w$}\n",
            "ID", "OFFSET", "ROUNDTRIP", "LOCKSTEP"
        );
        for (sid, r) in &self.clients {
            let short: String = sid.chars().take(8).collect();
            let _ = writeln!(
                out,
                "{short:>w$} {:>w$} {:>w$} {:>w$}",
                format!("{:012}", r.offset),
                format!("{:012}", r.round_trip),
                format!("{:012}", r.lockstep),
            );
        }
        out
    }
}

/// A scheduled command. Application fields are kept opaque in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub dispatcher: u32,
    pub at_lockstep: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventPayload for Command {
    const EVENT: &'static str = EVENT_CMD_ISSUE;
}

impl Command {
    pub fn is_state_sync(&self) -> bool {
        self.dispatcher == STATE_SYNC_DISPATCHER
    }
}

/// Fields of a state-sync (dispatcher 0) command that the relay reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSync {
    pub lockstep_time: i64,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn command_keeps_application_fields() {
        let cmd: Command = serde_json::from_value(json!({
            "dispatcher": 2,
            "atLockstep": 140,
            "unit": 7,
            "target": [1, 2],
        }))
        .unwrap();
        assert_eq!(cmd.dispatcher, 2);
        assert_eq!(cmd.at_lockstep, 140);
        assert_eq!(cmd.payload["unit"], 7);
        assert!(!cmd.is_state_sync());

        let back = serde_json::to_value(&cmd).unwrap();
        assert_eq!(back["atLockstep"], 140);
        assert_eq!(back["target"], json!([1, 2]));
    }

    #[test]
    fn ready_report_uses_camel_case() {
        let v = serde_json::to_value(ReadyReport {
            local_now: 1,
            offset: 2,
            round_trip: 3,
            lockstep: 4,
        })
        .unwrap();
        assert_eq!(v, json!({"localNow": 1, "offset": 2, "roundTrip": 3, "lockstep": 4}));
    }

    #[test]
    fn render_lists_clients_in_sid_order() {
        let report = ReadyReport {
            local_now: 10,
            offset: -3,
            round_trip: 4,
            lockstep: 13,
        };
        let table = ReadyTable {
            command_delay: 12,
            clients: BTreeMap::from([
                ("bbbbbbbbXYZ".to_string(), report),
                ("aaaa".to_string(), report),
            ]),
        };
        let text = table.render();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].trim_start().starts_with("ID"));
        assert_eq!(
            lines[1].split_whitespace().collect::<Vec<_>>(),
            ["aaaa", "-00000000003", "000000000004", "000000000013"]
        );
        assert!(lines[2].trim_start().starts_with("bbbbbbbb "));
    }
}
