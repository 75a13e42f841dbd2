//! Event socket: named handlers, acknowledgement tracking and the tick
//! that delivers everything the transport queued.
//!
//! Nothing here runs on the network tasks. Handlers and ack callbacks are
//! invoked only from [`EventSocket::tick`], in arrival order.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use lockstep_netproto::{
    Event,
    event::{LIFECYCLE_CONNECT, LIFECYCLE_DISCONNECT},
};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::PeerConfig;
use crate::error::LockstepError;
use crate::transport::{self, AckPacket, Emitter, TransportLink, TransportQueues};

pub type EventHandler = Box<dyn FnMut(&Event) -> Result<(), LockstepError> + Send>;
pub type AckCallback = Box<dyn FnOnce(Option<Value>) + Send>;

/// Returned by [`EventSocket::on`]; pass to [`EventSocket::off`] to remove
/// the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct PendingAck {
    id: u64,
    created_at: Instant,
    callback: AckCallback,
}

pub struct EventSocket {
    link: TransportLink,
    queues: TransportQueues,
    handlers: HashMap<String, Vec<(HandlerId, EventHandler)>>,
    next_handler_id: u64,
    /// Last correlation id handed out; the first emitted ack uses 1.
    last_ack_id: u64,
    pending_acks: VecDeque<PendingAck>,
    ack_expiration: Duration,
    /// Connection state seen by the previous tick.
    was_connected: bool,
}

impl EventSocket {
    /// Start the transport for `url` on `runtime` and wrap it.
    pub fn connect(runtime: &Handle, url: impl Into<String>, config: &PeerConfig) -> Self {
        let (link, queues) = transport::spawn(runtime, url.into(), config);
        Self::new(link, queues, config.ack_expiration)
    }

    pub fn new(link: TransportLink, queues: TransportQueues, ack_expiration: Duration) -> Self {
        Self {
            link,
            queues,
            handlers: HashMap::new(),
            next_handler_id: 1,
            last_ack_id: 0,
            pending_acks: VecDeque::new(),
            ack_expiration,
            was_connected: false,
        }
    }

    /// Register a handler. Several handlers may share a name; they run in
    /// registration order.
    pub fn on<F>(&mut self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: FnMut(&Event) -> Result<(), LockstepError> + Send + 'static,
    {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        self.handlers
            .entry(name.into())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered under `name`.
    pub fn off(&mut self, name: &str, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(name) else {
            debug!(event = name, "No handlers registered");
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(name);
        }
        removed
    }

    pub fn emitter(&self) -> Emitter {
        self.link.emitter()
    }

    /// Emit an event by name, without payload.
    pub fn emit(&self, name: &str) -> Result<(), LockstepError> {
        self.link.emitter().emit(Event::lifecycle(name))
    }

    pub fn emit_event(&self, event: Event) -> Result<(), LockstepError> {
        self.link.emitter().emit(event)
    }

    /// Emit an event carrying a fresh correlation id. `callback` runs on a
    /// later tick with the ack payload, unless the ack expires first.
    pub fn emit_with_ack<F>(&mut self, event: Event, callback: F) -> Result<u64, LockstepError>
    where
        F: FnOnce(Option<Value>) + Send + 'static,
    {
        let id = self.last_ack_id + 1;
        self.link.emitter().send_packet(&event.into_packet(Some(id)))?;
        self.last_ack_id = id;
        self.pending_acks.push_back(PendingAck {
            id,
            created_at: Instant::now(),
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn sid(&self) -> Option<String> {
        self.link.sid()
    }

    pub fn pending_acks(&self) -> usize {
        self.pending_acks.len()
    }

    /// Stop the transport. Pending acks are abandoned.
    pub fn close(&mut self) {
        self.link.close();
        self.pending_acks.clear();
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Deliver queued events, then queued acks, then any connection state
    /// change; finally expire the oldest pending ack if it is too old.
    ///
    /// Only the head of the pending list is checked, once per tick, so a
    /// backlog of stale acks drains one per tick.
    pub fn tick_at(&mut self, now: Instant) {
        while let Ok(event) = self.queues.events.try_recv() {
            self.dispatch(&event);
        }

        while let Ok(ack) = self.queues.acks.try_recv() {
            self.resolve_ack(ack);
        }

        let connected = self.link.is_connected();
        if connected != self.was_connected {
            self.was_connected = connected;
            let name = if connected {
                LIFECYCLE_CONNECT
            } else {
                LIFECYCLE_DISCONNECT
            };
            self.dispatch(&Event::lifecycle(name));
        }

        if let Some(head) = self.pending_acks.front()
            && now.saturating_duration_since(head.created_at) > self.ack_expiration
        {
            debug!(id = head.id, "Ack expired");
            self.pending_acks.pop_front();
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let Some(list) = self.handlers.get_mut(&event.name) else {
            debug!(event = %event.name, "No handler");
            return;
        };
        for (_, handler) in list.iter_mut() {
            if let Err(e) = handler(event) {
                warn!(event = %event.name, error = %e, "Handler failed");
            }
        }
    }

    fn resolve_ack(&mut self, ack: AckPacket) {
        let Some(pos) = self.pending_acks.iter().position(|p| p.id == ack.id) else {
            debug!(id = ack.id, "Ack for unknown id dropped");
            return;
        };
        if let Some(pending) = self.pending_acks.remove(pos) {
            (pending.callback)(ack.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::transport::{Loopback, loopback};

    fn socket() -> (EventSocket, Loopback) {
        let (link, queues, lb) = loopback();
        (
            EventSocket::new(link, queues, Duration::from_secs(1800)),
            lb,
        )
    }

    fn recorder(socket: &mut EventSocket, name: &str) -> (HandlerId, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = socket.on(name, move |e| {
            sink.lock().push(e.name.clone());
            Ok(())
        });
        (id, seen)
    }

    #[test]
    fn handlers_run_on_tick_in_order() {
        let (mut socket, lb) = socket();
        let (_, seen) = recorder(&mut socket, "a");
        let (_, seen_b) = recorder(&mut socket, "b");

        lb.events.send(Event::lifecycle("a")).unwrap();
        lb.events.send(Event::lifecycle("b")).unwrap();
        lb.events.send(Event::lifecycle("a")).unwrap();
        assert!(seen.lock().is_empty());

        socket.tick();
        assert_eq!(*seen.lock(), vec!["a", "a"]);
        assert_eq!(*seen_b.lock(), vec!["b"]);
    }

    #[test]
    fn failing_handler_does_not_stop_draining() {
        let (mut socket, lb) = socket();
        socket.on("x", |_| Err(LockstepError::NotConnected));
        let (_, seen) = recorder(&mut socket, "x");

        lb.events.send(Event::lifecycle("x")).unwrap();
        lb.events.send(Event::lifecycle("x")).unwrap();
        socket.tick();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn off_removes_only_that_handler() {
        let (mut socket, lb) = socket();
        let (id, seen) = recorder(&mut socket, "x");
        let (_, other) = recorder(&mut socket, "x");

        assert!(socket.off("x", id));
        assert!(!socket.off("x", id));
        assert!(!socket.off("nope", id));

        lb.events.send(Event::lifecycle("x")).unwrap();
        socket.tick();
        assert!(seen.lock().is_empty());
        assert_eq!(other.lock().len(), 1);
    }

    #[test]
    fn lifecycle_events_follow_connection_state() {
        let (mut socket, lb) = socket();
        let (_, up) = recorder(&mut socket, LIFECYCLE_CONNECT);
        let (_, down) = recorder(&mut socket, LIFECYCLE_DISCONNECT);

        socket.tick();
        assert!(up.lock().is_empty());

        lb.set_connected(true);
        socket.tick();
        socket.tick();
        assert_eq!(up.lock().len(), 1);

        lb.set_connected(false);
        socket.tick();
        assert_eq!(down.lock().len(), 1);
    }

    #[test]
    fn ack_ids_start_at_one_and_callbacks_fire_once() {
        let (mut socket, mut lb) = socket();
        lb.set_connected(true);

        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = got.clone();
        let id1 = socket
            .emit_with_ack(Event::lifecycle("q"), move |data| sink.lock().push(data))
            .unwrap();
        let id2 = socket.emit_with_ack(Event::lifecycle("q"), |_| {}).unwrap();
        assert_eq!((id1, id2), (1, 2));
        assert_eq!(lb.sent(), vec![r#"421["q"]"#, r#"422["q"]"#]);

        lb.acks
            .send(AckPacket {
                id: 1,
                data: Some(json!(["ok"])),
            })
            .unwrap();
        lb.acks.send(AckPacket { id: 1, data: None }).unwrap();
        lb.acks.send(AckPacket { id: 99, data: None }).unwrap();
        socket.tick();

        assert_eq!(*got.lock(), vec![Some(json!(["ok"]))]);
        assert_eq!(socket.pending_acks(), 1);
    }

    #[test]
    fn only_the_oldest_ack_expires_per_tick() {
        let (mut socket, lb) = socket();
        lb.set_connected(true);
        for _ in 0..3 {
            socket.emit_with_ack(Event::lifecycle("q"), |_| {}).unwrap();
        }

        let later = Instant::now() + Duration::from_secs(3600);
        socket.tick_at(later);
        assert_eq!(socket.pending_acks(), 2);
        socket.tick_at(later);
        socket.tick_at(later);
        assert_eq!(socket.pending_acks(), 0);
    }

    #[test]
    fn ack_expires_only_past_the_window() {
        let (link, queues, lb) = loopback();
        let mut socket = EventSocket::new(link, queues, Duration::ZERO);
        lb.set_connected(true);

        let before = Instant::now();
        socket.emit_with_ack(Event::lifecycle("q"), |_| {}).unwrap();
        socket.tick_at(before);
        assert_eq!(socket.pending_acks(), 1);

        socket.tick_at(Instant::now() + Duration::from_millis(1));
        assert_eq!(socket.pending_acks(), 0);
    }

    #[test]
    fn emit_with_ack_fails_when_disconnected() {
        let (mut socket, _lb) = socket();
        assert!(matches!(
            socket.emit_with_ack(Event::lifecycle("q"), |_| {}),
            Err(LockstepError::NotConnected)
        ));
        assert_eq!(socket.pending_acks(), 0);
        assert!(matches!(socket.emit("q"), Err(LockstepError::NotConnected)));
    }
}
