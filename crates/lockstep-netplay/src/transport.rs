//! Background transport: WebSocket connection, reconnect loop and keepalive.
//!
//! The loops run on a tokio runtime and never touch handler state. Decoded
//! events and acks cross to the tick side through crossbeam queues; frames go
//! out through an unbounded channel; connection state is a pair of atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use futures_util::{SinkExt, StreamExt};
use lockstep_netproto::{
    EngineType, Event, MessageType, Packet, decode, encode,
    event::{LIFECYCLE_CLOSE, LIFECYCLE_ERROR, LIFECYCLE_OPEN},
    messages::Handshake,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::config::PeerConfig;
use crate::error::LockstepError;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An acknowledgement received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct AckPacket {
    pub id: u64,
    pub data: Option<Value>,
}

struct Shared {
    connected: AtomicBool,
    /// Cleared by [`TransportLink::close`]; the loops exit once they see it.
    desired: AtomicBool,
    shutdown: Notify,
    sid: Mutex<Option<String>>,
}

/// Cheap handle for sending frames from the tick side.
#[derive(Clone)]
pub struct Emitter {
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

impl Emitter {
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn send_packet(&self, packet: &Packet) -> Result<(), LockstepError> {
        if !self.is_connected() {
            return Err(LockstepError::NotConnected);
        }
        self.outbound
            .send(encode(packet))
            .map_err(|_| LockstepError::ChannelSend)
    }

    /// Send an event that expects no acknowledgement.
    pub fn emit(&self, event: Event) -> Result<(), LockstepError> {
        self.send_packet(&event.into_packet(None))
    }
}

/// Tick-side view of a running transport.
pub struct TransportLink {
    emitter: Emitter,
}

impl TransportLink {
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.emitter.is_connected()
    }

    /// Session id from the last `open` handshake.
    pub fn sid(&self) -> Option<String> {
        self.emitter.shared.sid.lock().clone()
    }

    /// Stop reconnecting and close the current connection gracefully.
    pub fn close(&self) {
        self.emitter.shared.desired.store(false, Ordering::Release);
        self.emitter.shared.shutdown.notify_one();
    }
}

/// Queues drained by the tick side.
pub struct TransportQueues {
    pub events: Receiver<Event>,
    pub acks: Receiver<AckPacket>,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    ping_interval: Duration,
    ping_timeout: Duration,
    reconnect_delay: Duration,
}

/// Start the reconnect loop for `url` on `runtime`.
pub fn spawn(runtime: &Handle, url: String, config: &PeerConfig) -> (TransportLink, TransportQueues) {
    let (link, queues, pipes) = channels();
    let timing = Timing {
        ping_interval: config.ping_interval,
        ping_timeout: config.ping_timeout,
        reconnect_delay: config.reconnect_delay,
    };
    let shared = link.emitter.shared.clone();
    runtime.spawn(reconnect_loop(url, timing, shared, pipes));
    (link, queues)
}

/// Background ends of the queues.
struct Pipes {
    outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: Sender<Event>,
    acks_tx: Sender<AckPacket>,
}

fn channels() -> (TransportLink, TransportQueues, Pipes) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = unbounded();
    let (acks_tx, acks_rx) = unbounded();
    let shared = Arc::new(Shared {
        connected: AtomicBool::new(false),
        desired: AtomicBool::new(true),
        shutdown: Notify::new(),
        sid: Mutex::new(None),
    });
    (
        TransportLink {
            emitter: Emitter {
                outbound: outbound_tx,
                shared,
            },
        },
        TransportQueues {
            events: events_rx,
            acks: acks_rx,
        },
        Pipes {
            outbound_rx,
            events_tx,
            acks_tx,
        },
    )
}

fn error_event(message: String) -> Event {
    Event::new(LIFECYCLE_ERROR, Some(json!({ "message": message })))
}

async fn reconnect_loop(url: String, timing: Timing, shared: Arc<Shared>, mut pipes: Pipes) {
    while shared.desired.load(Ordering::Acquire) {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(%url, "Connected to server");
                shared.connected.store(true, Ordering::Release);
                let reason = run_connection(ws, timing, &shared, &mut pipes).await;
                shared.connected.store(false, Ordering::Release);
                info!(%reason, "Connection closed");
                let _ = pipes.events_tx.send(Event::lifecycle(LIFECYCLE_CLOSE));
            }
            Err(e) => {
                debug!(%url, error = %e, "Connect failed");
                let _ = pipes.events_tx.send(error_event(e.to_string()));
            }
        }

        if !shared.desired.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(timing.reconnect_delay) => {}
            _ = shared.shutdown.notified() => {}
        }
    }
    debug!("Transport stopped");
}

/// Drive one connection until it ends; returns the reason.
async fn run_connection(ws: Ws, timing: Timing, shared: &Shared, pipes: &mut Pipes) -> String {
    let (mut write, mut read) = ws.split();

    // Keepalive: ping right away, then one ping interval after each pong.
    let mut next_ping = Instant::now();
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let wake_at = pong_deadline.unwrap_or(next_ping);

        tokio::select! {
            _ = shared.shutdown.notified() => {
                let _ = write
                    .send(Message::text(encode(&Packet::message(MessageType::Disconnect, None))))
                    .await;
                let _ = write.send(Message::text(encode(&Packet::control(EngineType::Close)))).await;
                let _ = write.close().await;
                return "closed by client".to_string();
            }

            frame = pipes.outbound_rx.recv() => {
                let Some(frame) = frame else {
                    return "outbound channel closed".to_string();
                };
                trace!(%frame, "tx");
                if let Err(e) = write.send(Message::text(frame)).await {
                    let _ = pipes.events_tx.send(error_event(e.to_string()));
                    return format!("write error: {e}");
                }
            }

            msg = read.next() => {
                let text = match msg {
                    None => return "eof".to_string(),
                    Some(Err(e)) => {
                        let _ = pipes.events_tx.send(error_event(e.to_string()));
                        return format!("read error: {e}");
                    }
                    Some(Ok(Message::Close(_))) => return "closed by server".to_string(),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                trace!(frame = %text.as_str(), "rx");

                let decoded = match decode(text.as_str()) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, "Undecodable frame dropped");
                        continue;
                    }
                };
                if let Some(e) = &decoded.payload_error {
                    warn!(error = %e, "Frame payload is not valid JSON");
                }

                match route_packet(decoded.packet, shared, pipes) {
                    Routed::Continue => {}
                    Routed::Pong => {
                        pong_deadline = None;
                        next_ping = Instant::now() + timing.ping_interval;
                    }
                    Routed::ReplyPong => {
                        let pong = encode(&Packet::control(EngineType::Pong));
                        if let Err(e) = write.send(Message::text(pong)).await {
                            return format!("write error: {e}");
                        }
                    }
                    Routed::Close(reason) => return reason,
                }
            }

            _ = tokio::time::sleep_until(wake_at) => {
                if pong_deadline.is_some() {
                    warn!("Ping timeout; dropping connection");
                    return "ping timeout".to_string();
                }
                let ping = encode(&Packet::control(EngineType::Ping));
                if let Err(e) = write.send(Message::text(ping)).await {
                    return format!("write error: {e}");
                }
                pong_deadline = Some(Instant::now() + timing.ping_timeout);
            }
        }
    }
}

enum Routed {
    Continue,
    Pong,
    ReplyPong,
    Close(String),
}

fn route_packet(packet: Packet, shared: &Shared, pipes: &Pipes) -> Routed {
    match packet.engine {
        EngineType::Open => {
            match packet.data.map(serde_json::from_value::<Handshake>) {
                Some(Ok(handshake)) => {
                    debug!(sid = %handshake.sid, "Handshake");
                    *shared.sid.lock() = Some(handshake.sid);
                }
                Some(Err(e)) => warn!(error = %e, "Bad handshake payload"),
                None => warn!("Handshake without payload"),
            }
            let _ = pipes.events_tx.send(Event::lifecycle(LIFECYCLE_OPEN));
            Routed::Continue
        }
        EngineType::Close => Routed::Close("closed by server".to_string()),
        EngineType::Ping => Routed::ReplyPong,
        EngineType::Pong => Routed::Pong,
        EngineType::Message => route_message(packet, pipes),
        EngineType::Upgrade | EngineType::Noop => Routed::Continue,
    }
}

fn route_message(packet: Packet, pipes: &Pipes) -> Routed {
    match packet.message {
        Some(MessageType::Event) => match Event::from_packet(&packet) {
            Ok(event) => {
                let _ = pipes.events_tx.send(event);
            }
            Err(e) => warn!(error = %e, "Malformed event dropped"),
        },
        Some(MessageType::Ack) => match packet.id {
            Some(id) => {
                let _ = pipes.acks_tx.send(AckPacket {
                    id,
                    data: packet.data,
                });
            }
            None => debug!("Ack without id dropped"),
        },
        Some(MessageType::Disconnect) => {
            return Routed::Close("namespace disconnect".to_string());
        }
        other => debug!(message = ?other, "Message ignored"),
    }
    Routed::Continue
}

/// In-process stand-in for the background side, for driving the tick side
/// in tests.
#[cfg(test)]
pub(crate) struct Loopback {
    pub events: Sender<Event>,
    pub acks: Sender<AckPacket>,
    pub outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

#[cfg(test)]
impl Loopback {
    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Release);
    }

    /// Frames sent so far.
    pub fn sent(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            out.push(frame);
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn loopback() -> (TransportLink, TransportQueues, Loopback) {
    let (link, queues, pipes) = channels();
    let shared = link.emitter.shared.clone();
    (
        link,
        queues,
        Loopback {
            events: pipes.events_tx,
            acks: pipes.acks_tx,
            outbound: pipes.outbound_rx,
            shared,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_requires_connection() {
        let (link, _queues, mut lb) = loopback();
        let emitter = link.emitter();
        assert!(matches!(
            emitter.emit(Event::lifecycle("x")),
            Err(LockstepError::NotConnected)
        ));

        lb.set_connected(true);
        emitter.emit(Event::new("lockstep.io:sync", Some(json!({"t0": 1})))).unwrap();
        assert_eq!(lb.sent(), vec![r#"42["lockstep.io:sync",{"t0":1}]"#.to_string()]);
    }

    #[test]
    fn routes_frames_to_queues() {
        let (link, queues, pipes) = channels();
        let shared = &link.emitter.shared;
        let route = |text: &str| route_packet(decode(text).unwrap().packet, shared, &pipes);

        let open = r#"0{"sid":"abc","upgrades":[],"pingInterval":1,"pingTimeout":2}"#;
        assert!(matches!(route(open), Routed::Continue));
        assert_eq!(link.sid().as_deref(), Some("abc"));
        assert_eq!(queues.events.try_recv().unwrap().name, LIFECYCLE_OPEN);

        route(r#"42["lockstep.io:ready",{"commandDelay":3}]"#);
        assert_eq!(queues.events.try_recv().unwrap().name, "lockstep.io:ready");

        route(r#"437["ok"]"#);
        assert_eq!(
            queues.acks.try_recv().unwrap(),
            AckPacket {
                id: 7,
                data: Some(json!(["ok"]))
            }
        );

        // Not an event envelope: dropped.
        route(r#"42{"name":"x"}"#);
        assert!(queues.events.try_recv().is_err());

        assert!(matches!(route("2"), Routed::ReplyPong));
        assert!(matches!(route("3"), Routed::Pong));
        assert!(matches!(route("41"), Routed::Close(_)));
        assert!(matches!(route("1"), Routed::Close(_)));
    }
}
