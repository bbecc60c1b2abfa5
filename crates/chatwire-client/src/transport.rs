//! WebSocket transport.
//!
//! A thin layer that bridges the socket to typed event channels - protocol
//! logic stays in the sans-IO core. Outbound [`ServerBound`] events are
//! JSON-encoded onto the socket; inbound text frames decode to
//! [`ClientBound`] events. Unknown inbound events are logged and skipped so
//! a newer backend never wedges an older client.

use std::time::Duration;

use chatwire_proto::{ClientBound, ServerBound};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

/// The concrete socket type behind the pumps.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interval between WebSocket-level keepalive pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Channel capacity between the pumps and the driver.
const CHANNEL_CAPACITY: usize = 64;

/// Handle to an established transport.
///
/// Dropping the handle (or calling [`ConnectedTransport::stop`]) detaches
/// the pumps before the socket closes, so no callback fires against a
/// disposed session.
pub struct ConnectedTransport {
    /// Send events to the backend. A send error means the transport is gone
    /// and the event must be requeued.
    pub to_server: mpsc::Sender<ServerBound>,
    /// Receive events from the backend. `None` means the transport closed.
    pub from_server: mpsc::Receiver<ClientBound>,
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedTransport {
    /// Detach the pumps and drop the socket.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

impl Drop for ConnectedTransport {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Establish a WebSocket connection to the chat backend.
///
/// # Errors
///
/// - `TransportError::Connection` when the URL is invalid or the handshake
///   fails.
pub async fn connect(ws_url: &str) -> Result<ConnectedTransport, TransportError> {
    let url: Url = ws_url
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid url {ws_url}: {e}")))?;

    let (socket, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connection(format!("websocket handshake failed: {e}")))?;

    let (to_server_tx, to_server_rx) = mpsc::channel::<ServerBound>(CHANNEL_CAPACITY);
    let (from_server_tx, from_server_rx) = mpsc::channel::<ClientBound>(CHANNEL_CAPACITY);

    let handle = tokio::spawn(run_connection(socket, to_server_rx, from_server_tx));

    Ok(ConnectedTransport {
        to_server: to_server_tx,
        from_server: from_server_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Pump loop bridging the socket and the channels.
async fn run_connection(
    socket: WsStream,
    mut to_server: mpsc::Receiver<ServerBound>,
    from_server: mpsc::Sender<ClientBound>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = to_server.recv() => {
                let Some(event) = outbound else {
                    // Driver dropped its sender: graceful local close.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let raw = match event.encode() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("dropping unencodable outbound event: {e}");
                        continue;
                    },
                };

                if let Err(e) = sink.send(Message::Text(raw)).await {
                    warn!("websocket send failed: {e}");
                    break;
                }
            },

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => match ClientBound::decode(&raw) {
                        Ok(event) => {
                            if from_server.send(event).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => debug!("skipping unknown inbound event: {e}"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            warn!("websocket pong failed: {e}");
                            break;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}, // binary/pong frames carry nothing for us
                    Some(Err(e)) => {
                        warn!("websocket read failed: {e}");
                        break;
                    },
                }
            },

            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    warn!("websocket keepalive failed: {e}");
                    break;
                }
            },
        }
    }
}
