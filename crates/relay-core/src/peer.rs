//! Adapter traits at the two edges of a relay session.
//!
//! A session owns one [`ClientSink`] and one [`UpstreamPeer`]. Each adapter
//! also hands the session a channel of inbound notifications; the session
//! never touches the underlying sockets directly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{ClientSocketError, UpstreamError};
use crate::events::{RelayEvent, UpstreamEvent};

/// Connection to the remote realtime service.
///
/// `disconnect` must be idempotent.
#[async_trait]
pub trait UpstreamPeer: Send + Sync {
    /// Open the upstream link.
    async fn connect(&self) -> Result<(), UpstreamError>;

    /// Whether the link is currently open.
    fn is_connected(&self) -> bool;

    /// Send one event upstream under the given type.
    async fn send(&self, event_type: &str, event: RelayEvent) -> Result<(), UpstreamError>;

    /// Release the upstream link.
    async fn disconnect(&self);
}

/// A freshly created upstream peer together with its event stream.
pub struct UpstreamLink {
    /// The peer itself.
    pub peer: Box<dyn UpstreamPeer>,
    /// Server events, close and error notifications from the peer.
    pub events: mpsc::Receiver<UpstreamEvent>,
}

/// Creates one upstream peer per accepted client connection.
pub trait UpstreamFactory: Send + Sync {
    /// Build a new, not yet connected, upstream link.
    fn create(&self) -> UpstreamLink;

    /// Short non-identifying credential hint for logs (e.g. `"sk-..."`).
    fn credential_hint(&self) -> String {
        String::from("...")
    }
}

/// Outbound half of the client connection.
///
/// `close` must be idempotent.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: String) -> Result<(), ClientSocketError>;

    /// Close the client connection.
    async fn close(&self);
}
