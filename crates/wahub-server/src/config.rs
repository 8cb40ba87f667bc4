//! Server configuration.

use std::time::Duration;

use wahub_settings::HubSettings;

/// Runtime configuration for the hub and its listener.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Read deadline once a connection is established.
    pub read_timeout: Duration,
    /// Read deadline right after the handshake.
    pub initial_read_timeout: Duration,
    /// Bound on a single write to one client.
    pub write_timeout: Duration,
    /// Keepalive probe period.
    pub keepalive_interval: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Pause between failed transport connect attempts.
    pub connect_retry_wait: Duration,
    /// Re-run the connect loop when the transport reports a drop.
    pub auto_reconnect: bool,
    /// Log the transport out once after the first successful connect.
    pub force_fresh_login: bool,
    /// Run the scheduled dispatch loop.
    pub schedule_enabled: bool,
    /// Scheduled dispatch period.
    pub schedule_interval: Duration,
    /// How long a pairing artifact is replayed to joining clients.
    pub pairing_freshness: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            read_timeout: Duration::from_secs(300),
            initial_read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
            max_message_size: 1024 * 1024, // 1 MiB
            connect_retry_wait: Duration::from_secs(5),
            auto_reconnect: true,
            force_fresh_login: false,
            schedule_enabled: true,
            schedule_interval: Duration::from_secs(30),
            pairing_freshness: Duration::from_secs(300),
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            read_timeout: settings.server.read_timeout(),
            initial_read_timeout: settings.server.initial_read_timeout(),
            write_timeout: settings.server.write_timeout(),
            keepalive_interval: settings.server.keepalive_interval(),
            max_message_size: settings.server.max_message_size,
            connect_retry_wait: settings.transport.connect_retry_wait(),
            auto_reconnect: settings.transport.auto_reconnect,
            force_fresh_login: settings.transport.force_fresh_login,
            schedule_enabled: settings.schedule.enabled,
            schedule_interval: settings.schedule.check_interval(),
            pairing_freshness: settings.pairing.freshness(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_free_port() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_keepalive_is_shorter_than_read_deadline() {
        let cfg = HubConfig::default();
        assert!(cfg.keepalive_interval < cfg.initial_read_timeout);
        assert!(cfg.initial_read_timeout <= cfg.read_timeout);
    }

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = HubSettings::default();
        settings.server.port = 4000;
        settings.server.write_timeout_secs = 7;
        settings.transport.auto_reconnect = false;
        settings.schedule.check_interval_secs = 0;
        settings.pairing.freshness_secs = 60;

        let cfg = HubConfig::from(&settings);
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.write_timeout, Duration::from_secs(7));
        assert!(!cfg.auto_reconnect);
        assert_eq!(cfg.schedule_interval, Duration::from_secs(30));
        assert_eq!(cfg.pairing_freshness, Duration::from_secs(60));
        assert_eq!(cfg.max_message_size, 1024 * 1024);
    }
}
