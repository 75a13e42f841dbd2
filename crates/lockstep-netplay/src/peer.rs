//! `LockstepPeer`: clock sync, command scheduling and state audits on top
//! of an [`EventSocket`].
//!
//! The simulation drives everything by calling [`LockstepPeer::update`]
//! once per frame. Network handlers only record what arrived; commands
//! execute from `update`, never from a network task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep_netproto::{
    Event,
    constants::{EVENT_CMD_ISSUE, EVENT_READY, EVENT_SEED, EVENT_SYNC},
    messages::{Command, ReadyTable, Seed, SyncReply, SyncRequest},
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::audit::StateAuditor;
use crate::clock::{ClockSync, LocalClock};
use crate::config::PeerConfig;
use crate::dispatch::CommandExecutor;
use crate::error::LockstepError;
use crate::scheduler::CommandScheduler;
use crate::socket::{EventSocket, HandlerId};

type StateSource = Box<dyn FnMut() -> Value + Send>;

/// State touched by socket handlers.
struct PeerState {
    sync: ClockSync,
    scheduler: CommandScheduler,
    command_delay: i64,
    random_seed: Option<i64>,
    last_ready: Option<ReadyTable>,
    last_ready_text: String,
    /// Instant of the tick currently being processed.
    tick_now: Instant,
    /// First fatal error raised by a handler, reported by the next update.
    fatal: Option<LockstepError>,
}

pub struct LockstepPeer {
    socket: EventSocket,
    state: Arc<Mutex<PeerState>>,
    clock: Arc<dyn LocalClock>,
    executor: Box<dyn CommandExecutor>,
    auditor: StateAuditor,
    state_source: Option<StateSource>,
    sync_interval: Duration,
    next_probe: Option<Instant>,
    halted: bool,
}

impl LockstepPeer {
    /// Connect to the relay at `url`. The transport runs on `runtime`.
    pub fn connect<E>(
        runtime: &Handle,
        url: impl Into<String>,
        config: PeerConfig,
        clock: Arc<dyn LocalClock>,
        executor: E,
    ) -> Self
    where
        E: CommandExecutor + 'static,
    {
        let socket = EventSocket::connect(runtime, url, &config);
        Self::with_socket(socket, config, clock, Box::new(executor))
    }

    /// Build a peer over an existing socket and register its handlers.
    pub fn with_socket(
        mut socket: EventSocket,
        config: PeerConfig,
        clock: Arc<dyn LocalClock>,
        executor: Box<dyn CommandExecutor>,
    ) -> Self {
        let state = Arc::new(Mutex::new(PeerState {
            sync: ClockSync::new(config.sync_pool_size),
            scheduler: CommandScheduler::new(config.tick_duration),
            command_delay: 0,
            random_seed: None,
            last_ready: None,
            last_ready_text: String::new(),
            tick_now: Instant::now(),
            fatal: None,
        }));

        {
            let state = state.clone();
            socket.on(EVENT_SEED, move |event| {
                let seed: Seed = event.decode()?;
                info!(random_seed = seed.random_seed, "Seed received");
                state.lock().random_seed = Some(seed.random_seed);
                Ok(())
            });
        }

        {
            let state = state.clone();
            let clock = clock.clone();
            let emitter = socket.emitter();
            socket.on(EVENT_SYNC, move |event| {
                let reply: SyncReply = event.decode()?;
                let local_now = clock.now();
                let report = {
                    let mut st = state.lock();
                    let was_synced = st.sync.is_synchronized();
                    let sample = st.sync.record(local_now, reply.t0, reply.t1);
                    debug!(offset = sample.offset, round_trip = sample.round_trip, "Sync sample");
                    if !st.sync.is_synchronized() {
                        return Ok(());
                    }
                    if !was_synced {
                        info!(
                            offset = st.sync.last_offset(),
                            round_trip = st.sync.last_round_trip(),
                            "Clock synchronized"
                        );
                    }
                    st.sync.ready_report(local_now)
                };
                emitter.emit(Event::encode(&report)?)
            });
        }

        {
            let state = state.clone();
            socket.on(EVENT_READY, move |event| {
                let table: ReadyTable = event.decode()?;
                let mut st = state.lock();
                st.command_delay = table.command_delay;
                st.last_ready_text = table.render();
                st.last_ready = Some(table);
                Ok(())
            });
        }

        {
            let state = state.clone();
            let clock = clock.clone();
            socket.on(EVENT_CMD_ISSUE, move |event| {
                let command: Command = event.decode()?;
                let mut st = state.lock();
                let lockstep_now = st.sync.lockstep_time(clock.now());
                let tick_now = st.tick_now;
                if let Err(e) = st.scheduler.receive(command, lockstep_now, tick_now) {
                    error!(error = %e, "Command cannot be scheduled");
                    if st.fatal.is_none() {
                        st.fatal = Some(e);
                    }
                }
                Ok(())
            });
        }

        Self {
            socket,
            state,
            clock,
            executor,
            auditor: StateAuditor::new(config.audit_interval),
            state_source: None,
            sync_interval: config.sync_interval,
            next_probe: None,
            halted: false,
        }
    }

    /// Provide the simulation state snapshot hashed by state audits. Audits
    /// are skipped while no source is set.
    pub fn set_state_source<F>(&mut self, source: F)
    where
        F: FnMut() -> Value + Send + 'static,
    {
        self.state_source = Some(Box::new(source));
    }

    /// Call `f` with the session seed whenever the relay sends it.
    pub fn on_seed<F>(&mut self, mut f: F) -> HandlerId
    where
        F: FnMut(i64) + Send + 'static,
    {
        self.socket.on(EVENT_SEED, move |event| {
            let seed: Seed = event.decode()?;
            f(seed.random_seed);
            Ok(())
        })
    }

    /// Direct access to the socket for application events.
    pub fn socket_mut(&mut self) -> &mut EventSocket {
        &mut self.socket
    }

    /// Schedule a command for `command_delay` ticks from now. Returns the
    /// target tick, always later than the current lockstep time.
    ///
    /// Fails with [`LockstepError::NoCommandDelay`] until a readiness table
    /// has set a positive delay.
    pub fn issue_command(
        &mut self,
        dispatcher: u32,
        mut payload: Map<String, Value>,
    ) -> Result<i64, LockstepError> {
        if self.halted {
            return Err(LockstepError::Halted);
        }
        if self.state.lock().command_delay <= 0 {
            return Err(LockstepError::NoCommandDelay);
        }
        payload.insert("dispatcher".into(), Value::from(dispatcher));
        let at_lockstep = self.emit_command(payload)?;
        debug!(dispatcher, at_lockstep, "Command issued");
        Ok(at_lockstep)
    }

    /// Stamp `body` with its target tick and send it to the relay.
    fn emit_command(&mut self, mut body: Map<String, Value>) -> Result<i64, LockstepError> {
        let at_lockstep = {
            let st = self.state.lock();
            st.sync.lockstep_time(self.clock.now()) + st.command_delay
        };
        body.insert("atLockstep".into(), Value::from(at_lockstep));
        self.socket
            .emit_event(Event::new(EVENT_CMD_ISSUE, Some(Value::Object(body))))?;
        Ok(at_lockstep)
    }

    pub fn update(&mut self) -> Result<(), LockstepError> {
        self.update_at(Instant::now())
    }

    /// One simulation frame: deliver network input, probe the clock, audit
    /// state, then execute commands whose triggers are due at `now`.
    ///
    /// A fatal error is returned once; after that every call returns
    /// [`LockstepError::Halted`].
    pub fn update_at(&mut self, now: Instant) -> Result<(), LockstepError> {
        if self.halted {
            return Err(LockstepError::Halted);
        }

        self.state.lock().tick_now = now;
        self.socket.tick_at(now);

        let fatal = self.state.lock().fatal.take();
        if let Some(e) = fatal {
            return Err(self.halt(e));
        }

        if self.socket.is_connected() && self.next_probe.is_none_or(|t| now >= t) {
            self.next_probe = Some(now + self.sync_interval);
            let probe = Event::encode(&SyncRequest {
                t0: self.clock.now(),
            })?;
            if let Err(e) = self.socket.emit_event(probe) {
                debug!(error = %e, "Sync probe not sent");
            }
        }

        self.audit()?;

        let due = {
            let mut st = self.state.lock();
            let lockstep_now = st.sync.lockstep_time(self.clock.now());
            st.scheduler.fire_due(now, lockstep_now)
        };
        for command in due {
            if let Err(e) = self.executor.execute(&command) {
                return Err(self.halt(e));
            }
        }
        Ok(())
    }

    fn audit(&mut self) -> Result<(), LockstepError> {
        let lockstep_time = {
            let st = self.state.lock();
            if !st.sync.is_synchronized() {
                return Ok(());
            }
            st.sync.lockstep_time(self.clock.now())
        };
        if !self.auditor.is_due(lockstep_time) {
            return Ok(());
        }
        let Some(source) = self.state_source.as_mut() else {
            return Ok(());
        };
        let body = self.auditor.build(lockstep_time, source());
        match self.emit_command(body) {
            Ok(_) | Err(LockstepError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn halt(&mut self, e: LockstepError) -> LockstepError {
        error!(error = %e, "Peer halted");
        self.halted = true;
        e
    }

    /// Stop the transport. Pending commands and acks are abandoned.
    pub fn close(&mut self) {
        self.socket.close();
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn sid(&self) -> Option<String> {
        self.socket.sid()
    }

    pub fn local_now(&self) -> i64 {
        self.clock.now()
    }

    pub fn lockstep_time(&self) -> i64 {
        self.state.lock().sync.lockstep_time(self.clock.now())
    }

    pub fn is_synchronized(&self) -> bool {
        self.state.lock().sync.is_synchronized()
    }

    pub fn offset(&self) -> i64 {
        self.state.lock().sync.last_offset()
    }

    pub fn round_trip(&self) -> i64 {
        self.state.lock().sync.last_round_trip()
    }

    pub fn command_delay(&self) -> i64 {
        self.state.lock().command_delay
    }

    pub fn random_seed(&self) -> Option<i64> {
        self.state.lock().random_seed
    }

    pub fn pending_commands(&self) -> usize {
        self.state.lock().scheduler.len()
    }

    pub fn last_ready(&self) -> Option<ReadyTable> {
        self.state.lock().last_ready.clone()
    }

    /// Rendered readiness table from the last broadcast.
    pub fn last_ready_string(&self) -> String {
        self.state.lock().last_ready_text.clone()
    }

    pub fn last_server_now(&self) -> i64 {
        self.state.lock().sync.last_server_now()
    }

    pub fn last_local_now(&self) -> i64 {
        self.state.lock().sync.last_local_now()
    }

    pub fn last_sync_status(&self) -> bool {
        self.state.lock().sync.last_status()
    }
}
