//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: `SessionId`, `EventId` newtypes for type safety
//! - **Events**: [`RelayEvent`] plus the tagged client/upstream event enums
//! - **Adapter traits**: [`UpstreamPeer`], [`UpstreamFactory`], [`ClientSink`]
//! - **Errors**: [`UpstreamError`] and the fatal/recoverable classifier
//! - **Credentials**: [`ApiKey`] with redacted `Debug` and a safe log prefix

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod peer;
pub mod security;

pub use errors::{ClientSocketError, ErrorClass, EventParseError, UpstreamError, classify};
pub use events::{ClientEvent, RelayEvent, UpstreamEvent};
pub use ids::{EventId, SessionId};
pub use peer::{ClientSink, UpstreamFactory, UpstreamLink, UpstreamPeer};
pub use security::ApiKey;
