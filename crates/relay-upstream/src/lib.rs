//! # relay-upstream
//!
//! [`RealtimeUpstream`]: the [`relay_core::UpstreamPeer`] implementation
//! that speaks to an OpenAI-style realtime WebSocket endpoint, and
//! [`RealtimeFactory`], which creates one per relayed client.

#![deny(unsafe_code)]

pub mod realtime;

pub use realtime::{RealtimeConfig, RealtimeFactory, RealtimeUpstream};
