//! Pending command queue and execution triggers.
//!
//! A received command is queued by target tick and arms one trigger due
//! `delay × tick_duration` later. Triggers are polled from the tick; each
//! fired trigger executes the queued command whose target tick is closest
//! to the current lockstep time, which need not be the command that armed it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, Instant};

use lockstep_netproto::messages::Command;
use tracing::{debug, warn};

use crate::error::LockstepError;

#[derive(Debug)]
pub struct CommandScheduler {
    pending: BTreeMap<i64, Command>,
    triggers: BinaryHeap<Reverse<Instant>>,
    tick_duration: Duration,
}

impl CommandScheduler {
    pub fn new(tick_duration: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            triggers: BinaryHeap::new(),
            tick_duration,
        }
    }

    /// Queue a command received at `now`, when the local lockstep time is
    /// `lockstep_now`. A command whose tick is not in the future has been
    /// missed and cannot be executed in lockstep any more.
    pub fn receive(
        &mut self,
        command: Command,
        lockstep_now: i64,
        now: Instant,
    ) -> Result<(), LockstepError> {
        let at_lockstep = command.at_lockstep;
        let delay = at_lockstep - lockstep_now;
        if delay <= 0 {
            return Err(LockstepError::MissedSchedule {
                at_lockstep,
                lockstep_now,
            });
        }

        if self.pending.insert(at_lockstep, command).is_some() {
            warn!(at_lockstep, "Two commands scheduled for the same tick; keeping the later");
        }

        let ticks = u32::try_from(delay).unwrap_or(u32::MAX);
        let due = now + self.tick_duration.saturating_mul(ticks);
        self.triggers.push(Reverse(due));
        debug!(at_lockstep, delay, "Command scheduled");
        Ok(())
    }

    /// Pop every trigger due at `now` and take one command per trigger.
    pub fn fire_due(&mut self, now: Instant, lockstep_now: i64) -> Vec<Command> {
        let mut fired = Vec::new();
        while let Some(&Reverse(due)) = self.triggers.peek() {
            if due > now {
                break;
            }
            self.triggers.pop();
            if let Some(command) = self.take_closest(lockstep_now) {
                fired.push(command);
            }
        }
        fired
    }

    /// Remove the command whose tick is nearest `lockstep_now`; the earlier
    /// tick wins a tie.
    pub fn take_closest(&mut self, lockstep_now: i64) -> Option<Command> {
        let tick = self
            .pending
            .keys()
            .copied()
            .min_by_key(|&t| (t.abs_diff(lockstep_now), t))?;
        self.pending.remove(&tick)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Earliest armed trigger.
    pub fn next_due(&self) -> Option<Instant> {
        self.triggers.peek().map(|r| r.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;

    fn cmd(at_lockstep: i64, tag: &str) -> Command {
        let mut payload = Map::new();
        payload.insert("tag".into(), Value::String(tag.into()));
        Command {
            dispatcher: 1,
            at_lockstep,
            payload,
        }
    }

    fn tag(c: &Command) -> &str {
        c.payload["tag"].as_str().unwrap()
    }

    #[test]
    fn closest_tick_wins() {
        let mut s = CommandScheduler::new(Duration::from_millis(1));
        let now = Instant::now();
        for t in [100, 105, 110] {
            s.receive(cmd(t, &t.to_string()), 50, now).unwrap();
        }
        let c = s.take_closest(107).unwrap();
        assert_eq!(c.at_lockstep, 105);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn ties_go_to_the_earlier_tick() {
        let mut s = CommandScheduler::new(Duration::from_millis(1));
        let now = Instant::now();
        s.receive(cmd(100, "a"), 0, now).unwrap();
        s.receive(cmd(110, "b"), 0, now).unwrap();
        assert_eq!(s.take_closest(105).unwrap().at_lockstep, 100);
    }

    #[test]
    fn missed_schedule() {
        let mut s = CommandScheduler::new(Duration::from_millis(1));
        let now = Instant::now();
        for lockstep_now in [140, 141] {
            let err = s.receive(cmd(140, "x"), lockstep_now, now).unwrap_err();
            assert!(matches!(
                err,
                LockstepError::MissedSchedule { at_lockstep: 140, lockstep_now: n } if n == lockstep_now
            ));
        }
        assert!(s.is_empty());
        assert!(s.next_due().is_none());
    }

    #[test]
    fn triggers_fire_after_delay() {
        let tick = Duration::from_millis(10);
        let mut s = CommandScheduler::new(tick);
        let now = Instant::now();
        s.receive(cmd(120, "x"), 100, now).unwrap();

        assert_eq!(s.next_due(), Some(now + tick * 20));
        assert!(s.fire_due(now + tick * 19, 119).is_empty());

        let fired = s.fire_due(now + tick * 20, 120);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].at_lockstep, 120);
        assert!(s.is_empty());
        assert!(s.next_due().is_none());
    }

    #[test]
    fn same_tick_overwrites() {
        let mut s = CommandScheduler::new(Duration::from_millis(1));
        let now = Instant::now();
        s.receive(cmd(130, "first"), 100, now).unwrap();
        s.receive(cmd(130, "second"), 100, now).unwrap();
        assert_eq!(s.len(), 1);

        let fired = s.fire_due(now + Duration::from_secs(1), 130);
        // Two triggers, one command: the second trigger finds nothing.
        assert_eq!(fired.len(), 1);
        assert_eq!(tag(&fired[0]), "second");
    }
}
