//! Desync ledger: per-tick state hashes reported by each peer.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct DesyncLedger {
    entries: BTreeMap<i64, BTreeMap<String, String>>,
    /// Keep at most this many of the most recent ticks. `None` keeps all.
    retention: Option<usize>,
}

impl DesyncLedger {
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            entries: BTreeMap::new(),
            retention,
        }
    }

    /// Record `hash` as `sid`'s state at `tick`. A repeated report for the
    /// same tick replaces the earlier one.
    pub fn record(&mut self, tick: i64, sid: &str, hash: &str) {
        self.entries
            .entry(tick)
            .or_default()
            .insert(sid.to_string(), hash.to_string());

        if let Some(limit) = self.retention {
            while self.entries.len() > limit {
                self.entries.pop_first();
            }
        }
    }

    pub fn entry(&self, tick: i64) -> Option<&BTreeMap<String, String>> {
        self.entries.get(&tick)
    }

    /// Number of distinct hashes reported for `tick`.
    pub fn distinct_hashes(&self, tick: i64) -> usize {
        self.entries
            .get(&tick)
            .map(|m| m.values().collect::<BTreeSet<_>>().len())
            .unwrap_or(0)
    }

    pub fn is_consistent(&self, tick: i64) -> bool {
        self.distinct_hashes(tick) <= 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ticks(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }
}
