//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may contain any subset of fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wahub_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Default scheduled-dispatch period, also used when a non-positive value is configured.
pub const DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS: u64 = 30;

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 3000, "readTimeoutSecs": 300 },
///   "schedule": { "checkIntervalSecs": 15 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Listener and per-connection timings.
    pub server: ServerSettings,
    /// Messaging transport.
    pub transport: TransportSettings,
    /// Scheduled dispatch.
    pub schedule: ScheduleSettings,
    /// Pairing artifact cache.
    pub pairing: PairingSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("server.readTimeoutSecs", self.server.read_timeout_secs),
            (
                "server.initialReadTimeoutSecs",
                self.server.initial_read_timeout_secs,
            ),
            ("server.writeTimeoutSecs", self.server.write_timeout_secs),
            (
                "server.keepaliveIntervalSecs",
                self.server.keepalive_interval_secs,
            ),
            ("pairing.freshnessSecs", self.pairing.freshness_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{key} must be positive"
                )));
            }
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and per-connection timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Read deadline once a connection is established.
    pub read_timeout_secs: u64,
    /// Read deadline right after the handshake.
    pub initial_read_timeout_secs: u64,
    /// Bound on any single write to a client.
    pub write_timeout_secs: u64,
    /// Keepalive probe period.
    pub keepalive_interval_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            read_timeout_secs: 300,
            initial_read_timeout_secs: 60,
            write_timeout_secs: 30,
            keepalive_interval_secs: 20,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// Read deadline as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Initial read deadline as a [`Duration`].
    pub fn initial_read_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_read_timeout_secs)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Keepalive period as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Messaging transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Base URL of the WhatsApp Web sidecar.
    pub sidecar_url: String,
    /// Pause between failed connect attempts.
    pub connect_retry_wait_secs: u64,
    /// Reconnect after the session drops.
    pub auto_reconnect: bool,
    /// Log out once on startup so a new pairing is required.
    pub force_fresh_login: bool,
    /// Sidecar status poll period.
    pub status_poll_interval_ms: u64,
    /// Bound on any single sidecar request.
    pub request_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            sidecar_url: "http://127.0.0.1:3001".into(),
            connect_retry_wait_secs: 5,
            auto_reconnect: true,
            force_fresh_login: false,
            status_poll_interval_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

impl TransportSettings {
    /// Retry pause as a [`Duration`].
    pub fn connect_retry_wait(&self) -> Duration {
        Duration::from_secs(self.connect_retry_wait_secs)
    }

    /// Poll period as a [`Duration`].
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(100))
    }

    /// Request bound as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Scheduled dispatch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleSettings {
    /// Run the dispatch loop at all.
    pub enabled: bool,
    /// Dispatch period. Zero falls back to the default.
    pub check_interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS,
        }
    }
}

impl ScheduleSettings {
    /// Dispatch period, never zero.
    pub fn check_interval(&self) -> Duration {
        let secs = if self.check_interval_secs == 0 {
            DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS
        } else {
            self.check_interval_secs
        };
        Duration::from_secs(secs)
    }
}

/// Pairing artifact cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairingSettings {
    /// How long a cached artifact is replayed to joining clients.
    pub freshness_secs: u64,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            freshness_secs: 300,
        }
    }
}

impl PairingSettings {
    /// Freshness window as a [`Duration`].
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}
