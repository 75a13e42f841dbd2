use futures_util::{Sink, SinkExt};
use lockstep_netproto::{Event, Packet, ProtoError, encode, messages::EventPayload};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

/// Outbound channel sender type. Carries complete text frames.
pub type OutboundTx = mpsc::Sender<String>;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("encode failed: {0}")]
    Encode(#[from] ProtoError),
    #[error("connection closed")]
    Closed,
}

/// Spawn a writer task that forwards text frames to the WebSocket sink.
///
/// Exits when the channel is closed or a write fails.
pub fn spawn_ws_writer<S>(
    mut write: S,
    mut rx: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<anyhow::Result<()>>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            write.send(Message::text(frame)).await?;
        }
        let _ = write.close().await;
        Ok(())
    })
}

/// Send an already-encoded frame.
pub async fn send_frame(tx: &OutboundTx, frame: String) -> Result<(), OutboundError> {
    tx.send(frame).await.map_err(|_| OutboundError::Closed)
}

pub async fn send_packet(tx: &OutboundTx, packet: &Packet) -> Result<(), OutboundError> {
    send_frame(tx, encode(packet)).await
}

/// Encode a typed payload as an event packet (no ack id) and send it.
pub async fn send_event<T: EventPayload>(tx: &OutboundTx, payload: &T) -> Result<(), OutboundError> {
    let event = Event::encode(payload)?;
    send_packet(tx, &event.into_packet(None)).await
}
