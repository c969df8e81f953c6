//! Client socket adapter over an upgraded axum `WebSocket`.
//!
//! The write half becomes a [`ClientSink`]; the read half is pumped by a
//! spawned task into a bounded channel of [`ClientEvent`]s. When the session
//! stops draining that channel the pump blocks, which stops reading the
//! socket. Client close is also signalled out of band on
//! [`ClientLink::closed`], so a session that has paused reading still sees it.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{ClientEvent, ClientSink, ClientSocketError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read side of a relayed client connection.
pub struct ClientLink {
    /// Client messages in arrival order, ending with `Close`.
    pub events: mpsc::Receiver<ClientEvent>,
    /// Cancelled once the client is gone, whether or not `events` is drained.
    pub closed: CancellationToken,
}

impl ClientLink {
    /// Build a link and the sending halves that feed it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ClientEvent>, CancellationToken, Self) {
        let (events_tx, events) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let link = Self {
            events,
            closed: closed.clone(),
        };
        (events_tx, closed, link)
    }
}

/// Write half of a relayed client connection.
pub struct WsClient {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsClient {
    /// Split `socket` into a sink, a client link, and the reader task.
    pub fn split(socket: WebSocket, capacity: usize) -> (Self, ClientLink, JoinHandle<()>) {
        let (ws_tx, ws_rx) = socket.split();
        let (events_tx, closed, link) = ClientLink::channel(capacity);
        let reader = tokio::spawn(read_client(ws_rx, events_tx, closed));
        let client = Self {
            sink: Mutex::new(ws_tx),
            closed: AtomicBool::new(false),
        };
        (client, link, reader)
    }
}

#[async_trait]
impl ClientSink for WsClient {
    async fn send_text(&self, text: String) -> Result<(), ClientSocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientSocketError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientSocketError::Transport(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

async fn read_client(
    mut ws_rx: SplitStream<WebSocket>,
    events_tx: mpsc::Sender<ClientEvent>,
    closed: CancellationToken,
) {
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("client sent close frame");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                debug!(error = %e, "client read failed");
                break;
            }
        };
        if events_tx.send(ClientEvent::Message(text)).await.is_err() {
            return;
        }
    }
    closed.cancel();
    let _ = events_tx.send(ClientEvent::Close).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_close_is_visible_with_a_full_channel() {
        let (events_tx, closed, mut link) = ClientLink::channel(1);
        events_tx.send(ClientEvent::Message("a".into())).await.unwrap();
        assert!(events_tx.try_send(ClientEvent::Close).is_err());

        closed.cancel();
        assert!(link.closed.is_cancelled());
        assert_eq!(link.events.recv().await, Some(ClientEvent::Message("a".into())));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (events_tx, _closed, _link) = ClientLink::channel(0);
        assert_eq!(events_tx.max_capacity(), 1);
    }
}
