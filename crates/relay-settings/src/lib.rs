//! # relay-settings
//!
//! Configuration management with layered sources for the realtime relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.realtime-relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT` and `RELAY_*` overrides (highest priority)
//!
//! The upstream credential is never part of the settings file; it is read
//! from `OPENAI_API_KEY` by [`load_api_key`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    API_KEY_ENV, api_key_from, apply_env_overrides, apply_overrides_from, deep_merge, load_api_key,
    load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
