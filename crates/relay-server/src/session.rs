//! Relay session lifecycle: one accepted client paired with one upstream
//! peer, from upgrade through teardown.
//!
//! Two lanes run concurrently on the session task:
//!
//! - **client → upstream**: connects upstream, buffers client events while
//!   the connect is in flight, drains the buffer in arrival order, then
//!   forwards each event as it arrives.
//! - **upstream → client**: writes every server event to the client as a
//!   JSON text frame.
//!
//! Whichever lane ends first decides the close reason; both sides are then
//! torn down exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use relay_core::{
    ClientEvent, ClientSink, ErrorClass, RelayEvent, SessionId, UpstreamError, UpstreamEvent, UpstreamPeer,
    classify,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ClientLink;
use crate::config::RelayConfig;

/// Per-session tunables.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Upper bound on the upstream connect attempt.
    pub connect_timeout: Duration,
    /// Client events buffered while connecting; reading pauses when full.
    pub max_pending_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            max_pending_messages: 1024,
        }
    }
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_pending_messages: config.max_pending_messages.max(1),
        }
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    /// Created, upstream connect not yet started.
    Init,
    /// Upstream connect in flight; client events are buffered.
    UpstreamConnecting,
    /// Upstream open; client events are forwarded directly.
    UpstreamConnected,
    /// Torn down. Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Clone, Debug)]
pub enum CloseReason {
    /// The client closed its socket.
    ClientClosed,
    /// The upstream link closed.
    UpstreamClosed,
    /// The upstream connect attempt failed or timed out.
    ConnectFailed(UpstreamError),
    /// The upstream reported an unrecoverable error.
    UpstreamFatal(UpstreamError),
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::UpstreamClosed => "upstream_closed",
            Self::ConnectFailed(_) => "connect_failed",
            Self::UpstreamFatal(_) => "upstream_fatal",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Summary returned when a session finishes.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    /// Why the session ended.
    pub reason: CloseReason,
    /// Client events delivered upstream.
    pub forwarded_upstream: u64,
    /// Server events written to the client.
    pub forwarded_client: u64,
    /// Client messages dropped as unparseable.
    pub dropped: u64,
    /// Every state the session entered, in order, starting with `Init`.
    pub states: Vec<RelayState>,
}

impl SessionOutcome {
    /// The last state entered; `Closed` for any finished session.
    pub fn final_state(&self) -> RelayState {
        self.states.last().copied().unwrap_or(RelayState::Init)
    }
}

struct Shared {
    state: RelayState,
    history: Vec<RelayState>,
    pending: VecDeque<RelayEvent>,
}

impl Shared {
    fn enter(&mut self, state: RelayState) {
        if self.state != state {
            self.state = state;
            self.history.push(state);
        }
    }
}

/// One client paired with one upstream peer.
pub struct RelaySession {
    id: SessionId,
    config: SessionConfig,
    client: Box<dyn ClientSink>,
    upstream: Box<dyn UpstreamPeer>,
    shared: Mutex<Shared>,
    forwarded_upstream: AtomicU64,
    forwarded_client: AtomicU64,
    dropped: AtomicU64,
}

impl RelaySession {
    /// Create a session in the `Init` state.
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        client: Box<dyn ClientSink>,
        upstream: Box<dyn UpstreamPeer>,
    ) -> Self {
        Self {
            id,
            config,
            client,
            upstream,
            shared: Mutex::new(Shared {
                state: RelayState::Init,
                history: vec![RelayState::Init],
                pending: VecDeque::new(),
            }),
            forwarded_upstream: AtomicU64::new(0),
            forwarded_client: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.shared.lock().state
    }

    /// Number of client events waiting for the upstream connect.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Drive the session until either side ends or `shutdown` fires.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn run(
        self,
        mut client: ClientLink,
        mut upstream_rx: mpsc::Receiver<UpstreamEvent>,
        shutdown: CancellationToken,
    ) -> SessionOutcome {
        counter!("relay_sessions_total").increment(1);
        gauge!("relay_sessions_active").increment(1.0);

        let reason = tokio::select! {
            reason = self.client_lane(&mut client) => reason,
            reason = self.upstream_lane(&mut upstream_rx) => reason,
            () = shutdown.cancelled() => CloseReason::Shutdown,
        };

        self.terminate(&reason).await;
        gauge!("relay_sessions_active").decrement(1.0);

        let outcome = SessionOutcome {
            reason,
            forwarded_upstream: self.forwarded_upstream.load(Ordering::Relaxed),
            forwarded_client: self.forwarded_client.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            states: self.shared.lock().history.clone(),
        };
        info!(
            reason = outcome.reason.as_str(),
            forwarded_upstream = outcome.forwarded_upstream,
            forwarded_client = outcome.forwarded_client,
            dropped = outcome.dropped,
            "session closed"
        );
        outcome
    }

    async fn client_lane(&self, client: &mut ClientLink) -> CloseReason {
        self.set_state(RelayState::UpstreamConnecting);
        info!("connecting to upstream");

        let timeout = self.config.connect_timeout;
        let connect = tokio::time::timeout(timeout, self.upstream.connect());
        tokio::pin!(connect);

        let connected = loop {
            let queue_full = self.pending_len() >= self.config.max_pending_messages;
            tokio::select! {
                biased;
                () = client.closed.cancelled() => return CloseReason::ClientClosed,
                result = &mut connect => {
                    break result.unwrap_or(Err(UpstreamError::Timeout(timeout)));
                }
                event = client.events.recv(), if !queue_full => match event {
                    Some(ClientEvent::Message(text)) => {
                        if let Some(event) = self.parse_client(&text) {
                            self.shared.lock().pending.push_back(event);
                        }
                    }
                    Some(ClientEvent::Close) | None => return CloseReason::ClientClosed,
                },
            }
        };

        if let Err(e) = connected {
            error!(error = %e, kind = e.error_kind(), "upstream connect failed");
            return CloseReason::ConnectFailed(e);
        }
        info!("connected to upstream");

        if let Err(reason) = self.drain_pending().await {
            return reason;
        }

        while let Some(event) = client.events.recv().await {
            match event {
                ClientEvent::Message(text) => {
                    let Some(event) = self.parse_client(&text) else { continue };
                    if let Err(reason) = self.forward_upstream(event).await {
                        return reason;
                    }
                }
                ClientEvent::Close => break,
            }
        }
        CloseReason::ClientClosed
    }

    /// Switch to connected, then send buffered events in arrival order.
    ///
    /// Runs on the client lane, which is the only writer of the queue.
    async fn drain_pending(&self) -> Result<(), CloseReason> {
        self.set_state(RelayState::UpstreamConnected);
        let mut drained = 0usize;
        loop {
            let next = self.shared.lock().pending.pop_front();
            let Some(event) = next else { break };
            self.forward_upstream(event).await?;
            drained += 1;
        }
        if drained > 0 {
            debug!(count = drained, "drained pending client events");
        }
        Ok(())
    }

    async fn forward_upstream(&self, event: RelayEvent) -> Result<(), CloseReason> {
        let event_type = event.event_type().to_string();
        match self.upstream.send(&event_type, event).await {
            Ok(()) => {
                let _ = self.forwarded_upstream.fetch_add(1, Ordering::Relaxed);
                counter!("relay_events_forwarded_total", "direction" => "client_to_upstream").increment(1);
                Ok(())
            }
            Err(e) => match classify(&e) {
                ErrorClass::Fatal => {
                    error!(error = %e, event_type = %event_type, "upstream send failed");
                    Err(CloseReason::UpstreamFatal(e))
                }
                ErrorClass::Recoverable => {
                    warn!(error = %e, event_type = %event_type, "upstream send failed, event dropped");
                    Ok(())
                }
            },
        }
    }

    fn parse_client(&self, text: &str) -> Option<RelayEvent> {
        match RelayEvent::parse(text) {
            Ok(event) => Some(event),
            Err(e) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("relay_client_events_dropped_total").increment(1);
                warn!(error = %e, len = text.len(), "dropping unparseable client message");
                None
            }
        }
    }

    async fn upstream_lane(&self, upstream_rx: &mut mpsc::Receiver<UpstreamEvent>) -> CloseReason {
        while let Some(event) = upstream_rx.recv().await {
            match event {
                UpstreamEvent::ServerEvent(event) => {
                    let event_type = event.event_type().to_string();
                    match self.client.send_text(event.to_json()).await {
                        Ok(()) => {
                            let _ = self.forwarded_client.fetch_add(1, Ordering::Relaxed);
                            counter!("relay_events_forwarded_total", "direction" => "upstream_to_client")
                                .increment(1);
                        }
                        Err(e) => warn!(error = %e, event_type = %event_type, "client write failed"),
                    }
                }
                UpstreamEvent::Close => {
                    info!("upstream closed");
                    return CloseReason::UpstreamClosed;
                }
                UpstreamEvent::Error(e) => match classify(&e) {
                    ErrorClass::Fatal => {
                        error!(error = %e, kind = e.error_kind(), "upstream error");
                        return CloseReason::UpstreamFatal(e);
                    }
                    ErrorClass::Recoverable => {
                        warn!(error = %e, kind = e.error_kind(), "upstream error");
                    }
                },
            }
        }
        CloseReason::UpstreamClosed
    }

    fn set_state(&self, state: RelayState) {
        let mut shared = self.shared.lock();
        if shared.state != RelayState::Closed {
            shared.enter(state);
        }
    }

    /// Close both sides once. Later calls are no-ops.
    async fn terminate(&self, reason: &CloseReason) {
        {
            let mut shared = self.shared.lock();
            if shared.state == RelayState::Closed {
                return;
            }
            shared.enter(RelayState::Closed);
            let discarded = shared.pending.len();
            shared.pending.clear();
            if discarded > 0 {
                debug!(count = discarded, "discarding pending client events");
            }
        }
        debug!(reason = reason.as_str(), "tearing down session");
        self.client.close().await;
        self.upstream.disconnect().await;
    }
}
