//! Clock synchronization against the host.
//!
//! Each probe reply `{t0, t1}` observed at local time `now` yields one
//! offset sample `now - t1 - (now - t0) / 2` and one round-trip sample
//! `now - t0`. Both pools are newest-first and bounded; the peer counts as
//! synchronized once the offset pool is full.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use lockstep_netproto::messages::ReadyReport;

/// Source of the peer's local time, in ticks.
pub trait LocalClock: Send + Sync {
    fn now(&self) -> i64;
}

/// Local time as a frame counter advanced by the simulation loop.
#[derive(Debug, Default)]
pub struct FrameClock {
    frame: AtomicI64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one frame; returns the new frame number.
    pub fn advance(&self) -> i64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set(&self, frame: i64) {
        self.frame.store(frame, Ordering::Release);
    }
}

impl LocalClock for FrameClock {
    fn now(&self) -> i64 {
        self.frame.load(Ordering::Acquire)
    }
}

/// Local time as milliseconds since creation.
#[derive(Debug)]
pub struct MillisClock {
    origin: Instant,
}

impl MillisClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MillisClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock for MillisClock {
    fn now(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// One processed probe reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub offset: i64,
    pub round_trip: i64,
}

#[derive(Debug)]
pub struct ClockSync {
    pool_size: usize,
    offsets: VecDeque<i64>,
    round_trips: VecDeque<i64>,
    last_offset: i64,
    last_round_trip: i64,
    last_server_now: i64,
    last_local_now: i64,
    last_status: bool,
}

impl ClockSync {
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool_size,
            offsets: VecDeque::with_capacity(pool_size + 1),
            round_trips: VecDeque::with_capacity(pool_size + 1),
            last_offset: 0,
            last_round_trip: 0,
            last_server_now: 0,
            last_local_now: 0,
            last_status: false,
        }
    }

    /// Fold in a probe reply received at local time `now`.
    pub fn record(&mut self, now: i64, t0: i64, t1: i64) -> SyncSample {
        let round_trip = now - t0;
        let offset = now - t1 - round_trip / 2;

        push_bounded(&mut self.offsets, offset, self.pool_size);
        push_bounded(&mut self.round_trips, round_trip, self.pool_size);

        self.last_offset = self.offset();
        self.last_round_trip = self.round_trip();
        self.last_server_now = t1;
        self.last_local_now = now;
        self.last_status = self.is_synchronized();

        SyncSample { offset, round_trip }
    }

    /// Mean offset over the pool; 0 when empty.
    pub fn offset(&self) -> i64 {
        mean(&self.offsets)
    }

    /// Mean round trip over the pool; 0 when empty.
    pub fn round_trip(&self) -> i64 {
        mean(&self.round_trips)
    }

    pub fn is_synchronized(&self) -> bool {
        self.offsets.len() >= self.pool_size
    }

    /// Shared virtual time for a local reading, using the offset as of the
    /// last processed reply.
    pub fn lockstep_time(&self, local_now: i64) -> i64 {
        local_now - self.last_offset
    }

    pub fn ready_report(&self, local_now: i64) -> ReadyReport {
        ReadyReport {
            local_now,
            offset: self.last_offset,
            round_trip: self.last_round_trip,
            lockstep: self.lockstep_time(local_now),
        }
    }

    pub fn samples(&self) -> usize {
        self.offsets.len()
    }

    pub fn last_offset(&self) -> i64 {
        self.last_offset
    }

    pub fn last_round_trip(&self) -> i64 {
        self.last_round_trip
    }

    pub fn last_server_now(&self) -> i64 {
        self.last_server_now
    }

    pub fn last_local_now(&self) -> i64 {
        self.last_local_now
    }

    pub fn last_status(&self) -> bool {
        self.last_status
    }
}

fn push_bounded(pool: &mut VecDeque<i64>, value: i64, cap: usize) {
    pool.push_front(value);
    pool.truncate(cap);
}

/// Truncating integer mean.
fn mean(pool: &VecDeque<i64>) -> i64 {
    if pool.is_empty() {
        return 0;
    }
    pool.iter().sum::<i64>() / pool.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_to_true_offset() {
        // Peer clock runs `true_offset` ticks ahead of the host; each leg
        // of the probe takes `latency` ticks.
        let true_offset = 250;
        let latency = 7;
        let mut sync = ClockSync::new(10);

        let mut host_now = 1_000;
        for round in 1..=10 {
            let t0 = host_now + true_offset;
            host_now += latency;
            let t1 = host_now;
            host_now += latency;
            let now = host_now + true_offset;

            let sample = sync.record(now, t0, t1);
            assert_eq!(sample.offset, true_offset);
            assert_eq!(sample.round_trip, 2 * latency);
            assert_eq!(sync.is_synchronized(), round == 10, "round {round}");
            host_now += 60;
        }

        assert_eq!(sync.offset(), true_offset);
        assert_eq!(sync.round_trip(), 14);
        assert_eq!(sync.lockstep_time(5_000), 5_000 - true_offset);
    }

    #[test]
    fn pool_keeps_newest_and_stays_synchronized() {
        let mut sync = ClockSync::new(3);
        for i in 0..3 {
            sync.record(100 + i, 100 + i, 100 + i);
        }
        assert!(sync.is_synchronized());

        // Three large samples push the zeros out.
        for i in 0..3 {
            sync.record(1_000 + i, 1_000 + i, 970 + i);
        }
        assert_eq!(sync.samples(), 3);
        assert_eq!(sync.offset(), 30);
        assert!(sync.is_synchronized());
        assert!(sync.last_status());
    }

    #[test]
    fn means_truncate_toward_zero() {
        let mut sync = ClockSync::new(5);
        sync.record(10, 10, 9); // offset 1
        sync.record(10, 10, 10); // offset 0
        assert_eq!(sync.offset(), 0);

        let mut sync = ClockSync::new(5);
        sync.record(10, 10, 11); // offset -1
        sync.record(10, 10, 10); // offset 0
        assert_eq!(sync.offset(), 0);
    }

    #[test]
    fn empty_pool_reads_zero() {
        let sync = ClockSync::new(15);
        assert_eq!(sync.offset(), 0);
        assert_eq!(sync.round_trip(), 0);
        assert!(!sync.is_synchronized());
        assert_eq!(sync.lockstep_time(42), 42);
    }

    #[test]
    fn ready_report_uses_last_values() {
        let mut sync = ClockSync::new(1);
        sync.record(120, 100, 50);
        let report = sync.ready_report(130);
        assert_eq!(report.offset, 60);
        assert_eq!(report.round_trip, 20);
        assert_eq!(report.lockstep, 70);
        assert_eq!(sync.last_server_now(), 50);
        assert_eq!(sync.last_local_now(), 120);
    }

    #[test]
    fn frame_clock_counts() {
        let clock = FrameClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.advance(), 1);
        clock.set(40);
        assert_eq!(clock.now(), 40);
    }
}
