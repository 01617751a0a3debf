//! # nimble-settings
//!
//! Server and logging settings, layered lowest to highest:
//! compiled defaults, `~/.nimble/settings.json`, then `NIMBLE_*` variables.
//! The binary loads them once and converts the server section into the
//! runtime config.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
