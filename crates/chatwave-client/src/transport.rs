//! WebSocket transport for the session.
//!
//! Provides [`ConnectedClient`] which moves STOMP frames between channels and
//! a WebSocket. This is a thin layer that only sends and receives frames;
//! protocol logic remains in the Sans-IO [`crate::Session`].

use chatwave_proto::StompFrame;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Frames buffered in each direction.
const CHANNEL_CAPACITY: usize = 64;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Handle to an open WebSocket.
///
/// Frames are sent and received via the channels; background tasks handle the
/// socket. `from_server` yields `None` once the socket is closed.
pub struct ConnectedClient {
    /// Send frames to the broker.
    pub to_server: mpsc::Sender<StompFrame>,
    /// Receive frames from the broker.
    pub from_server: mpsc::Receiver<StompFrame>,
    outgoing: tokio::task::AbortHandle,
    incoming: tokio::task::AbortHandle,
}

impl ConnectedClient {
    /// Stop both socket tasks.
    pub fn stop(&self) {
        self.outgoing.abort();
        self.incoming.abort();
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open a WebSocket to the broker, e.g. `ws://localhost:8080/ws/websocket`.
pub async fn connect(url: &str) -> Result<ConnectedClient, TransportError> {
    let (stream, _response) =
        connect_async(url).await.map_err(|e| TransportError::Connection(format!("{url}: {e}")))?;
    tracing::debug!(url, "websocket open");

    let (ws_sender, ws_receiver) = stream.split();
    let (to_server_tx, to_server_rx) = mpsc::channel::<StompFrame>(CHANNEL_CAPACITY);
    let (from_server_tx, from_server_rx) = mpsc::channel::<StompFrame>(CHANNEL_CAPACITY);

    let outgoing = tokio::spawn(forward_outgoing(to_server_rx, ws_sender));
    let incoming = tokio::spawn(forward_incoming(ws_receiver, from_server_tx));

    Ok(ConnectedClient {
        to_server: to_server_tx,
        from_server: from_server_rx,
        outgoing: outgoing.abort_handle(),
        incoming: incoming.abort_handle(),
    })
}

async fn forward_outgoing<S>(mut rx: mpsc::Receiver<StompFrame>, mut ws_sender: S)
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let text = match frame.encode_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(command = %frame.command, error = %e, "failed to encode frame");
                continue;
            },
        };
        tracing::trace!(command = %frame.command, "sending frame");
        if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "websocket send failed");
            break;
        }
    }
    // Best effort; the socket may already be gone
    let _ = ws_sender.send(Message::Close(None)).await;
}

async fn forward_incoming<S>(mut ws_receiver: S, tx: mpsc::Sender<StompFrame>)
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(result) = ws_receiver.next().await {
        let bytes: &[u8] = match &result {
            Ok(Message::Text(text)) => text.as_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => {
                tracing::debug!("websocket closed by broker");
                break;
            },
            // Ping replies are sent by tungstenite
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "websocket error");
                break;
            },
        };

        match StompFrame::decode(bytes) {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    tracing::debug!("receiver dropped, stopping incoming task");
                    break;
                }
            },
            Ok(None) => tracing::trace!("heart-beat"),
            Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
        }
    }
}
