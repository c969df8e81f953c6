//! `RelayServer`: single-endpoint Axum WebSocket listener.
//!
//! Every request lands on one fallback handler. Only the root path is a
//! relay target; anything else is refused before the upgrade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_core::{SessionId, UpstreamFactory};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::WsClient;
use crate::config::RelayConfig;
use crate::session::{RelaySession, SessionConfig};
use crate::shutdown::ShutdownCoordinator;

/// Why a connection target was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TargetRejection {
    /// The request carried no path.
    #[error("missing request path")]
    MissingPath,
    /// The request path is not the relay endpoint.
    #[error("invalid pathname: {0}")]
    InvalidPath(String),
}

impl TargetRejection {
    /// Label for the rejection metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPath => "missing_path",
            Self::InvalidPath(_) => "invalid_path",
        }
    }
}

/// Accept only the root path. Query strings are not part of `path`.
pub fn validate_target(path: &str) -> Result<(), TargetRejection> {
    match path {
        "" => Err(TargetRejection::MissingPath),
        "/" => Ok(()),
        other => Err(TargetRejection::InvalidPath(other.to_string())),
    }
}

/// Shared state accessible from the Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
    /// Creates one upstream peer per client.
    pub factory: Arc<dyn UpstreamFactory>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Clients currently holding a connection slot.
    pub connections: Arc<AtomicUsize>,
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The relay server.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    factory: Arc<dyn UpstreamFactory>,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<AtomicUsize>,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: RelayConfig, factory: Arc<dyn UpstreamFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            shutdown: Arc::clone(&self.shutdown),
            connections: Arc::clone(&self.connections),
        };

        Router::new().fallback(relay_entry).with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the serve task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay listener failed");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Clients currently connected.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// Fallback handler for every request.
async fn relay_entry(
    State(state): State<AppState>,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(rejection) = validate_target(uri.path()) {
        warn!(path = uri.path(), "rejecting connection: {rejection}");
        counter!("relay_connections_rejected_total", "reason" => rejection.kind()).increment(1);
        return (StatusCode::NOT_FOUND, rejection.to_string()).into_response();
    }

    if state.shutdown.is_shutting_down() {
        counter!("relay_connections_rejected_total", "reason" => "shutting_down").increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let Some(slot) = ConnectionSlot::acquire(&state.connections, state.config.max_connections) else {
        warn!(max = state.config.max_connections, "connection limit reached");
        counter!("relay_connections_rejected_total", "reason" => "capacity").increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            counter!("relay_connections_rejected_total", "reason" => "not_websocket").increment(1);
            return rejection.into_response();
        }
    };

    let tracked = Arc::clone(&state.shutdown);
    ws.on_upgrade(move |socket| tracked.track(relay_client(socket, state, slot)))
}

async fn relay_client(socket: WebSocket, state: AppState, _slot: ConnectionSlot) {
    let session_id = SessionId::new();
    info!(
        session_id = %session_id,
        credential = %state.factory.credential_hint(),
        "client connected"
    );

    let (client, client_link, reader) = WsClient::split(socket, state.config.client_channel_capacity);
    let link = state.factory.create();
    let session = RelaySession::new(
        session_id,
        SessionConfig::from(state.config.as_ref()),
        Box::new(client),
        link.peer,
    );

    let _ = session.run(client_link, link.events, state.shutdown.token()).await;
    reader.abort();
}
