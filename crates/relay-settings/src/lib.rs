//! Layered configuration for the relay bot.
//!
//! Compiled defaults, then `~/.relay/settings.json` deep-merged on top, then
//! `RELAY_*` environment overrides. Settings are loaded once at startup and
//! passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, require_api_key, settings_path};
pub use types::*;
