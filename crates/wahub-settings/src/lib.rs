//! # wahub-settings
//!
//! Configuration with layered sources for the wahub hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `$WAHUB_CONFIG` or `~/.wahub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `WS_READ_TIMEOUT`, ... (highest priority)
//!
//! A `.env` file in the working directory is read into the process
//! environment before layer 3 is applied.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_dotenv, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
