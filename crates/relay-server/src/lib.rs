//! # relay-server
//!
//! Axum `WebSocket` listener that pairs every accepted client with its own
//! upstream realtime peer.
//!
//! - Single relay endpoint at `/`; other paths are refused before upgrade
//! - [`session::RelaySession`] buffers client events until upstream is ready
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod server;
pub mod session;
pub mod shutdown;
