//! Error types and the upstream error classifier.
//!
//! Every adapter method returns a typed result; session call sites route
//! every [`UpstreamError`] through [`classify`] to decide whether the
//! session survives.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by an upstream peer.
#[derive(Clone, Debug, Error)]
pub enum UpstreamError {
    // Fatal
    /// The transport link failed or could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// The upstream rejected the credential.
    #[error("authentication failed: {0}")]
    Authentication(String),

    // Recoverable
    /// The connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// A send was attempted while the link was down.
    #[error("upstream is not connected")]
    NotConnected,
    /// Writing a single event failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The upstream sent a frame the peer could not decode.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// An application-level error reported by the upstream service.
    #[error("server error: {0}")]
    Server(String),
    /// Any other failure, described in free form.
    #[error("{0}")]
    Other(String),
}

/// How a session reacts to an upstream error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Close the session.
    Fatal,
    /// Log and keep relaying.
    Recoverable,
}

/// Description fragments that mark a free-form error as link-level.
const FATAL_INDICATORS: &[&str] = &["connection", "authentication"];

impl UpstreamError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Authentication(_) => true,
            Self::Server(description) | Self::Other(description) => {
                has_fatal_indicator(description)
            }
            Self::Timeout(_) | Self::NotConnected | Self::Send(_) | Self::Protocol(_) => false,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Authentication(_) => "authentication",
            Self::Timeout(_) => "timeout",
            Self::NotConnected => "not_connected",
            Self::Send(_) => "send",
            Self::Protocol(_) => "protocol",
            Self::Server(_) => "server",
            Self::Other(_) => "other",
        }
    }
}

fn has_fatal_indicator(description: &str) -> bool {
    let lower = description.to_lowercase();
    FATAL_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// Decide whether an upstream error is fatal to its session.
pub fn classify(error: &UpstreamError) -> ErrorClass {
    if error.is_fatal() {
        ErrorClass::Fatal
    } else {
        ErrorClass::Recoverable
    }
}

/// Why an inbound client message could not be turned into an event.
#[derive(Debug, Error)]
pub enum EventParseError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("event is not a JSON object")]
    NotAnObject,
    /// Object without a `type` field.
    #[error("event has no \"type\" field")]
    MissingType,
    /// `type` present but not a string.
    #[error("event \"type\" is not a string")]
    InvalidType,
}

/// Errors writing to the client socket.
#[derive(Debug, Error)]
pub enum ClientSocketError {
    /// The socket was already closed.
    #[error("client socket closed")]
    Closed,
    /// The underlying transport failed.
    #[error("client transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_link_failures_are_fatal() {
        assert_eq!(classify(&UpstreamError::Connection("reset".into())), ErrorClass::Fatal);
        assert_eq!(classify(&UpstreamError::Authentication("bad key".into())), ErrorClass::Fatal);
    }

    #[test]
    fn event_level_failures_are_recoverable() {
        assert_eq!(classify(&UpstreamError::Send("frame too large".into())), ErrorClass::Recoverable);
        assert_eq!(classify(&UpstreamError::Protocol("bad frame".into())), ErrorClass::Recoverable);
        assert_eq!(classify(&UpstreamError::NotConnected), ErrorClass::Recoverable);
        assert_eq!(
            classify(&UpstreamError::Timeout(Duration::from_secs(1))),
            ErrorClass::Recoverable
        );
    }

    #[test]
    fn free_form_description_with_indicator_is_fatal() {
        assert!(UpstreamError::Other("WebSocket connection lost".into()).is_fatal());
        assert!(UpstreamError::Other("Authentication expired".into()).is_fatal());
        assert!(UpstreamError::Server("CONNECTION refused by peer".into()).is_fatal());
    }

    #[test]
    fn free_form_description_without_indicator_is_recoverable() {
        assert!(!UpstreamError::Other("unknown event type".into()).is_fatal());
        assert!(!UpstreamError::Server("invalid_request_error".into()).is_fatal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(UpstreamError::Connection(String::new()).error_kind(), "connection");
        assert_eq!(UpstreamError::Authentication(String::new()).error_kind(), "authentication");
        assert_eq!(UpstreamError::NotConnected.error_kind(), "not_connected");
        assert_eq!(UpstreamError::Other(String::new()).error_kind(), "other");
    }

    #[test]
    fn display_includes_description() {
        let err = UpstreamError::Authentication("401 Unauthorized".into());
        assert_eq!(err.to_string(), "authentication failed: 401 Unauthorized");
    }

    #[test]
    fn parse_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: EventParseError = json_err.into();
        assert!(err.to_string().starts_with("invalid JSON"));
    }
}
