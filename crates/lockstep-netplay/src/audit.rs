//! Periodic state audits.
//!
//! Every `interval` lockstep ticks a synchronized peer issues a state-sync
//! command carrying a checksum of its simulation state. The relay collects
//! these per tick to spot peers that diverged.

use lockstep_netproto::{
    checksum::state_hash, constants::STATE_SYNC_DISPATCHER,
};
use serde_json::{Map, Value};

#[derive(Debug)]
pub struct StateAuditor {
    interval: i64,
    last_audited: Option<i64>,
}

impl StateAuditor {
    pub fn new(interval: i64) -> Self {
        Self {
            interval,
            last_audited: None,
        }
    }

    /// Whether `lockstep_time` is an audit tick that has not been audited
    /// yet. A non-positive interval disables audits.
    pub fn is_due(&self, lockstep_time: i64) -> bool {
        self.interval > 0
            && lockstep_time % self.interval == 0
            && self.last_audited != Some(lockstep_time)
    }

    /// Build the state-sync command body for `lockstep_time`:
    /// `{dispatcher: 0, lockstepTime, state, hash}`. The hash covers the
    /// serialized object before `hash` is added.
    pub fn build(&mut self, lockstep_time: i64, state: Value) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("dispatcher".into(), Value::from(STATE_SYNC_DISPATCHER));
        body.insert("lockstepTime".into(), Value::from(lockstep_time));
        body.insert("state".into(), state);

        let hash = state_hash(&Value::Object(body.clone()).to_string());
        body.insert("hash".into(), Value::String(hash.to_string()));

        self.last_audited = Some(lockstep_time);
        body
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn due_once_per_audit_tick() {
        let mut auditor = StateAuditor::new(30);
        assert!(!auditor.is_due(31));
        assert!(auditor.is_due(60));

        auditor.build(60, json!({}));
        assert!(!auditor.is_due(60));
        assert!(auditor.is_due(90));
    }

    #[test]
    fn disabled_with_zero_interval() {
        assert!(!StateAuditor::new(0).is_due(0));
    }

    #[test]
    fn identical_state_hashes_identically() {
        let state = json!({"units": [1, 2, 3], "gold": 40});
        let a = StateAuditor::new(30).build(90, state.clone());
        let b = StateAuditor::new(30).build(90, state);
        assert_eq!(a["hash"], b["hash"]);
        assert_eq!(a["dispatcher"], 0);
        assert_eq!(a["lockstepTime"], 90);

        let c = StateAuditor::new(30).build(90, json!({"units": [1, 2], "gold": 40}));
        assert_ne!(a["hash"], c["hash"]);
    }

    #[test]
    fn hash_is_over_body_without_hash() {
        let body = StateAuditor::new(30).build(30, json!("s"));
        let mut unhashed = body.clone();
        unhashed.remove("hash");
        let expected = state_hash(&Value::Object(unhashed).to_string()).to_string();
        assert_eq!(body["hash"], Value::String(expected));
    }
}
