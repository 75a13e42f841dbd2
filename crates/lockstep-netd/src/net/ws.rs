use std::net::SocketAddr;

use futures_util::StreamExt;
use lockstep_netproto::decode;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::inbound::{ConnId, InboundEvent, next_conn_id};
use super::outbound::spawn_ws_writer;

/// Capacity of each connection's outbound frame queue.
const OUTBOUND_QUEUE: usize = 1024;

/// Start a WebSocket listener. All decoded packets and connection events are sent to `tx`.
pub async fn run_ws_listener(bind: SocketAddr, tx: mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    run_ws_listener_with_listener(listener, tx).await
}

/// Run the accept loop on an existing listener.
pub async fn run_ws_listener_with_listener(
    listener: TcpListener,
    tx: mpsc::Sender<InboundEvent>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let conn_id = next_conn_id();

        let tx_clone = tx.clone();
        tokio::spawn(async move {
            handle_ws_connection(stream, peer, conn_id, tx_clone).await;
        });
    }
}

/// Handle a single connection. Public to allow embedding the relay in other crates.
pub async fn handle_ws_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnId,
    tx: mpsc::Sender<InboundEvent>,
) {
    let _ = stream.set_nodelay(true);

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (write, mut read) = ws_stream.split();

    let (out_tx, out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let writer = spawn_ws_writer(write, out_rx);
    let cancel_token = CancellationToken::new();

    tx.send(InboundEvent::Connected {
        conn_id,
        peer,
        outbound: out_tx.clone(),
        cancel_token: cancel_token.clone(),
    })
    .await
    .ok();

    let mut disconnect_reason = "eof".to_string();

    loop {
        let msg = tokio::select! {
            msg = read.next() => msg,
            _ = cancel_token.cancelled() => {
                disconnect_reason = "cancelled by server".to_string();
                break;
            }
        };

        let text = match msg {
            None => break,
            Some(Err(e)) => {
                disconnect_reason = format!("read error: {e}");
                break;
            }
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) => {
                disconnect_reason = "closed by peer".to_string();
                break;
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(conn_id, %peer, len = data.len(), "Binary frame ignored");
                continue;
            }
            // WebSocket-level ping/pong is answered by tungstenite.
            Some(Ok(_)) => continue,
        };

        trace!(conn_id, frame = %text.as_str(), "rx");

        let decoded = match decode(text.as_str()) {
            Ok(d) => d,
            Err(e) => {
                warn!(conn_id, %peer, error = %e, "Undecodable frame dropped");
                continue;
            }
        };
        if let Some(e) = &decoded.payload_error {
            debug!(conn_id, %peer, error = %e, "Frame payload is not valid JSON");
        }

        if tx
            .send(InboundEvent::Packet {
                conn_id,
                peer,
                packet: decoded.packet,
            })
            .await
            .is_err()
        {
            disconnect_reason = "inbound channel closed".to_string();
            break;
        }
    }

    let _ = tx
        .send(InboundEvent::Disconnected {
            conn_id,
            peer,
            reason: disconnect_reason,
        })
        .await;

    // Close outbound channel so the writer can flush and exit. The session
    // holds another sender until it processes `Disconnected`.
    drop(out_tx);
    let _ = writer.await;
}
