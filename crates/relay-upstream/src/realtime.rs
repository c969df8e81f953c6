//! Realtime upstream peer: a thin client over `tokio-tungstenite`.
//!
//! One [`RealtimeUpstream`] per relay session. Outbound events go through a
//! mutex-guarded sink so each `send` reports its own result; inbound frames
//! are read on a spawned task and delivered as [`UpstreamEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{ApiKey, EventId, RelayEvent, UpstreamError, UpstreamEvent, UpstreamFactory, UpstreamLink, UpstreamPeer};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const OPENAI_BETA: &str = "openai-beta";
const REALTIME_V1: &str = "realtime=v1";

/// Upstream endpoint and credential.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// WebSocket URL of the realtime API.
    pub url: String,
    /// Model passed as the `model` query parameter.
    pub model: String,
    /// Credential sent as a bearer token.
    pub api_key: ApiKey,
    /// Capacity of the inbound event channel handed to the session.
    pub event_channel_capacity: usize,
}

impl RealtimeConfig {
    /// Create a config with the default channel capacity.
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key,
            event_channel_capacity: 256,
        }
    }

    /// Full endpoint URL including the `model` query parameter.
    pub fn endpoint(&self) -> String {
        if self.model.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}model={}", self.url, self.model)
    }

    /// Build the handshake request with auth headers.
    pub fn handshake_request(&self) -> Result<Request<()>, UpstreamError> {
        let mut request = self
            .endpoint()
            .into_client_request()
            .map_err(|e| UpstreamError::Connection(format!("invalid upstream url: {e}")))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose()))
            .map_err(|_| UpstreamError::Authentication("credential is not a valid header value".into()))?;
        let headers = request.headers_mut();
        let _ = headers.insert(AUTHORIZATION, bearer);
        let _ = headers.insert(HeaderName::from_static(OPENAI_BETA), HeaderValue::from_static(REALTIME_V1));
        Ok(request)
    }
}

/// Map a rejected handshake status to an upstream error.
pub fn handshake_status_error(status: u16) -> UpstreamError {
    match status {
        401 | 403 => UpstreamError::Authentication(format!("upstream rejected credential ({status})")),
        _ => UpstreamError::Connection(format!("upstream handshake failed ({status})")),
    }
}

fn map_connect_error(err: tungstenite::Error) -> UpstreamError {
    match err {
        tungstenite::Error::Http(response) => handshake_status_error(response.status().as_u16()),
        other => UpstreamError::Connection(other.to_string()),
    }
}

fn map_send_error(err: tungstenite::Error) -> UpstreamError {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Io(_) => UpstreamError::Connection(err.to_string()),
        other => UpstreamError::Send(other.to_string()),
    }
}

/// A single upstream realtime connection.
pub struct RealtimeUpstream {
    config: Arc<RealtimeConfig>,
    sink: Mutex<Option<WsSink>>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::Sender<UpstreamEvent>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeUpstream {
    /// Create an unconnected peer and the receiver for its events.
    pub fn new(config: Arc<RealtimeConfig>) -> (Self, mpsc::Receiver<UpstreamEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let peer = Self {
            config,
            sink: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            reader: parking_lot::Mutex::new(None),
        };
        (peer, events_rx)
    }

    /// Stamp the outgoing type and a generated `event_id` when absent.
    fn outbound(event_type: &str, mut event: RelayEvent) -> RelayEvent {
        if !event.contains_key("event_id") {
            event.insert("event_id", Value::String(EventId::new().to_string()));
        }
        event.insert("type", Value::String(event_type.to_string()));
        event
    }
}

#[async_trait]
impl UpstreamPeer for RealtimeUpstream {
    async fn connect(&self) -> Result<(), UpstreamError> {
        if self.is_connected() {
            return Ok(());
        }
        let request = self.config.handshake_request()?;
        debug!(url = %self.config.url, model = %self.config.model, "connecting upstream");

        let (ws, _) = connect_async(request).await.map_err(map_connect_error)?;
        let (ws_tx, ws_rx) = ws.split();

        *self.sink.lock().await = Some(ws_tx);
        self.connected.store(true, Ordering::Release);

        let handle = tokio::spawn(read_loop(ws_rx, self.events_tx.clone(), Arc::clone(&self.connected)));
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }
        info!(model = %self.config.model, "upstream connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, event_type: &str, event: RelayEvent) -> Result<(), UpstreamError> {
        let event = Self::outbound(event_type, event);
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(UpstreamError::NotConnected);
        };
        if !self.is_connected() {
            return Err(UpstreamError::NotConnected);
        }
        sink.send(Message::Text(event.to_json().into()))
            .await
            .map_err(map_send_error)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("upstream disconnected");
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for RealtimeUpstream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Read frames until the link closes, translating them into events.
async fn read_loop(
    mut ws_rx: SplitStream<WsStream>,
    events_tx: mpsc::Sender<UpstreamEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = ws_rx.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => decode_server_event(&text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => decode_server_event(text),
                Err(_) => UpstreamEvent::Error(UpstreamError::Protocol(format!(
                    "non-UTF8 binary frame ({} bytes)",
                    data.len()
                ))),
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "upstream sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "upstream read failed");
                let _ = events_tx
                    .send(UpstreamEvent::Error(UpstreamError::Connection(e.to_string())))
                    .await;
                break;
            }
        };
        if events_tx.send(event).await.is_err() {
            break;
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events_tx.send(UpstreamEvent::Close).await;
}

fn decode_server_event(text: &str) -> UpstreamEvent {
    match RelayEvent::parse(text) {
        Ok(event) => UpstreamEvent::ServerEvent(event),
        Err(e) => UpstreamEvent::Error(UpstreamError::Protocol(format!("undecodable server event: {e}"))),
    }
}

/// Creates a fresh [`RealtimeUpstream`] for every relayed client.
pub struct RealtimeFactory {
    config: Arc<RealtimeConfig>,
}

impl RealtimeFactory {
    /// Create a factory sharing one config across peers.
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl UpstreamFactory for RealtimeFactory {
    fn create(&self) -> UpstreamLink {
        let (peer, events) = RealtimeUpstream::new(Arc::clone(&self.config));
        UpstreamLink {
            peer: Box::new(peer),
            events,
        }
    }

    fn credential_hint(&self) -> String {
        self.config.api_key.log_prefix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    fn config_for(url: &str) -> RealtimeConfig {
        RealtimeConfig::new(url, "gpt-test", ApiKey::new("sk-test-123"))
    }

    #[test]
    fn endpoint_appends_model() {
        let cfg = config_for("wss://api.example.com/v1/realtime");
        assert_eq!(cfg.endpoint(), "wss://api.example.com/v1/realtime?model=gpt-test");
    }

    #[test]
    fn endpoint_with_existing_query() {
        let cfg = config_for("wss://api.example.com/v1/realtime?x=1");
        assert_eq!(cfg.endpoint(), "wss://api.example.com/v1/realtime?x=1&model=gpt-test");
    }

    #[test]
    fn endpoint_without_model() {
        let mut cfg = config_for("ws://localhost:1/rt");
        cfg.model.clear();
        assert_eq!(cfg.endpoint(), "ws://localhost:1/rt");
    }

    #[test]
    fn handshake_request_carries_auth_headers() {
        let request = config_for("wss://api.example.com/v1/realtime").handshake_request().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer sk-test-123");
        assert_eq!(request.headers()["openai-beta"], "realtime=v1");
    }

    #[test]
    fn handshake_request_rejects_bad_url() {
        let err = config_for("not a url").handshake_request().unwrap_err();
        assert_matches!(err, UpstreamError::Connection(_));
    }

    #[test]
    fn handshake_status_classification() {
        assert_matches!(handshake_status_error(401), UpstreamError::Authentication(_));
        assert_matches!(handshake_status_error(403), UpstreamError::Authentication(_));
        assert_matches!(handshake_status_error(502), UpstreamError::Connection(_));
    }

    #[test]
    fn outbound_keeps_existing_event_id() {
        let event = RelayEvent::parse(r#"{"type":"a","event_id":"mine"}"#).unwrap();
        let out = RealtimeUpstream::outbound("a", event);
        assert_eq!(out.get("event_id").unwrap(), "mine");
    }

    #[test]
    fn outbound_generates_event_id() {
        let event = RelayEvent::parse(r#"{"type":"a"}"#).unwrap();
        let out = RealtimeUpstream::outbound("a", event);
        assert!(out.get("event_id").unwrap().as_str().unwrap().starts_with("evt_"));
    }

    #[test]
    fn factory_hint_is_prefix_only() {
        let factory = RealtimeFactory::new(config_for("ws://localhost:1"));
        assert_eq!(factory.credential_hint(), "sk-...");
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let (peer, _rx) = RealtimeUpstream::new(Arc::new(config_for("ws://127.0.0.1:1")));
        assert!(!peer.is_connected());
        let event = RelayEvent::parse(r#"{"type":"a"}"#).unwrap();
        assert_matches!(peer.send("a", event).await, Err(UpstreamError::NotConnected));
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (peer, _rx) = RealtimeUpstream::new(Arc::new(config_for(&format!("ws://{addr}/rt"))));
        let err = peer.connect().await.unwrap_err();
        assert!(err.is_fatal(), "expected fatal, got {err:?}");
    }

    #[tokio::test]
    async fn unauthorized_handshake_is_authentication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let reject = |_: &HsRequest, _: HsResponse| -> Result<HsResponse, ErrorResponse> {
                let mut resp = ErrorResponse::new(None);
                *resp.status_mut() = StatusCode::UNAUTHORIZED;
                Err(resp)
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
        });

        let (peer, _rx) = RealtimeUpstream::new(Arc::new(config_for(&format!("ws://{addr}/rt"))));
        let err = peer.connect().await.unwrap_err();
        assert_matches!(err, UpstreamError::Authentication(_));
    }

    #[tokio::test]
    async fn relays_events_both_ways_and_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = tokio::sync::oneshot::channel::<String>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let capture = move |req: &HsRequest, resp: HsResponse| -> Result<HsResponse, ErrorResponse> {
                let auth = req.headers()[AUTHORIZATION].to_str().unwrap_or_default().to_string();
                let _ = auth_tx.send(auth);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture).await.unwrap();

            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a text frame");
            };
            let received: Value = serde_json::from_str(&text).unwrap();

            ws.send(Message::Text(r#"{"type":"session.created"}"#.into())).await.unwrap();
            ws.close(None).await.unwrap();
            received
        });

        let (peer, mut rx) = RealtimeUpstream::new(Arc::new(config_for(&format!("ws://{addr}/rt"))));
        peer.connect().await.unwrap();
        assert!(peer.is_connected());
        assert_eq!(auth_rx.await.unwrap(), "Bearer sk-test-123");

        let event = RelayEvent::parse(r#"{"type":"response.create","response":{}}"#).unwrap();
        peer.send("response.create", event).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received["type"], "response.create");
        assert!(received["event_id"].is_string());

        assert_matches!(rx.recv().await, Some(UpstreamEvent::ServerEvent(ev)) if ev.event_type() == "session.created");
        assert_matches!(rx.recv().await, Some(UpstreamEvent::Close));
        assert!(!peer.is_connected());

        peer.disconnect().await;
        peer.disconnect().await;
    }
}
