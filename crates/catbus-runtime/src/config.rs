//! Node configuration, loaded from JSON with human-readable durations

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use catbus_core::*;
use catbus_link::LinkConfig;
use catbus_services::ServiceConfig;
use serde::{Deserialize, Deserializer};

/// Parse "4s", "250ms", "1m 30s"
fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn default_level() -> String {
    "info".into()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            json: false,
        }
    }
}

/// Service channel settings
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    pub port: u16,
    /// Multicast group; broadcast is used when absent
    pub multicast: Option<Ipv4Addr>,
    #[serde(deserialize_with = "duration")]
    pub tick_rate: Duration,
    #[serde(deserialize_with = "duration")]
    pub offer_rate: Duration,
    #[serde(deserialize_with = "duration")]
    pub listen_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub connected_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub ping_threshold: Duration,
    pub shutdown_repeats: u32,
    #[serde(deserialize_with = "duration")]
    pub shutdown_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            port: SERVICES_PORT,
            multicast: Some(Ipv4Addr::from(SERVICES_MCAST_ADDR)),
            tick_rate: SERVICE_RATE,
            offer_rate: SERVICE_OFFER_RATE,
            listen_timeout: SERVICE_LISTEN_TIMEOUT,
            connected_timeout: SERVICE_CONNECTED_TIMEOUT,
            ping_threshold: SERVICE_CONNECTED_PING_THRESHOLD,
            shutdown_repeats: SERVICE_SHUTDOWN_REPEATS,
            shutdown_interval: SERVICE_SHUTDOWN_INTERVAL,
        }
    }
}

impl ServiceSettings {
    pub fn to_config(&self) -> ServiceConfig {
        ServiceConfig {
            tick_rate: self.tick_rate,
            offer_rate: self.offer_rate,
            listen_timeout: self.listen_timeout,
            connected_timeout: self.connected_timeout,
            ping_threshold: self.ping_threshold,
            shutdown_repeats: self.shutdown_repeats,
            shutdown_interval: self.shutdown_interval,
        }
    }
}

/// Link channel settings
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSettings {
    pub port: u16,
    pub universe: u32,
    pub priority: u16,
    #[serde(deserialize_with = "duration")]
    pub tick_rate: Duration,
    #[serde(deserialize_with = "duration")]
    pub discover_rate: Duration,
    #[serde(deserialize_with = "duration")]
    pub consumer_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub producer_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub remote_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub retransmit_rate: Duration,
    #[serde(deserialize_with = "duration")]
    pub min_rate: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        LinkSettings {
            port: defaults.port,
            universe: defaults.universe,
            priority: defaults.priority,
            tick_rate: LINK_BASE_RATE,
            discover_rate: defaults.discover_rate,
            consumer_timeout: defaults.consumer_timeout,
            producer_timeout: defaults.producer_timeout,
            remote_timeout: defaults.remote_timeout,
            retransmit_rate: defaults.retransmit_rate,
            min_rate: defaults.min_rate,
        }
    }
}

impl LinkSettings {
    /// The Team port is the bound link port, which may differ from `port` when that is 0
    pub fn to_config(&self, port: u16) -> LinkConfig {
        LinkConfig {
            port,
            universe: self.universe,
            priority: self.priority,
            discover_rate: self.discover_rate,
            consumer_timeout: self.consumer_timeout,
            producer_timeout: self.producer_timeout,
            remote_timeout: self.remote_timeout,
            retransmit_rate: self.retransmit_rate,
            min_rate: self.min_rate,
        }
    }
}

/// Everything a node needs to start
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Node identity; random when absent
    pub origin: Option<u64>,
    pub bind_ip: IpAddr,
    /// Broadcast address for channels without a multicast group
    pub broadcast_ip: Ipv4Addr,
    pub log: LogConfig,
    pub services: ServiceSettings,
    pub links: LinkSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            origin: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: Ipv4Addr::BROADCAST,
            log: LogConfig::default(),
            services: ServiceSettings::default(),
            links: LinkSettings::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> CatbusResult<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)
            .map_err(|e| CatbusError::Config(format!("Invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CatbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CatbusError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Reject settings the managers cannot run with
    pub fn validate(&self) -> CatbusResult<()> {
        let services = &self.services;
        let links = &self.links;

        let non_zero = [
            ("services.tick_rate", services.tick_rate),
            ("services.offer_rate", services.offer_rate),
            ("services.listen_timeout", services.listen_timeout),
            ("services.connected_timeout", services.connected_timeout),
            ("links.tick_rate", links.tick_rate),
            ("links.discover_rate", links.discover_rate),
            ("links.min_rate", links.min_rate),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, d)| d.is_zero()) {
            return Err(CatbusError::Config(format!("{} must be above zero", name)));
        }

        if services.ping_threshold >= services.connected_timeout {
            return Err(CatbusError::Config(
                "services.ping_threshold must be below services.connected_timeout".into(),
            ));
        }
        if services.shutdown_repeats == 0 {
            return Err(CatbusError::Config("services.shutdown_repeats must be at least 1".into()));
        }
        if let Some(group) = services.multicast {
            if !group.is_multicast() {
                return Err(CatbusError::Config(format!("{} is not a multicast group", group)));
            }
        }
        Ok(())
    }

    pub fn origin(&self) -> Origin {
        Origin::new(self.origin.unwrap_or_else(rand::random))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.services.port, 32041);
        assert_eq!(config.links.port, 44632);
        assert_eq!(config.services.multicast, Some(Ipv4Addr::new(239, 43, 96, 31)));
    }

    #[test]
    fn test_human_durations() {
        let config = RuntimeConfig::from_json_str(
            r#"{
                "origin": 42,
                "log": { "level": "debug", "json": true },
                "services": { "listen_timeout": "2s", "shutdown_interval": "50ms", "multicast": null },
                "links": { "universe": 3, "discover_rate": "1m 30s" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.origin(), Origin::new(42));
        assert!(config.log.json);
        assert_eq!(config.services.listen_timeout, Duration::from_secs(2));
        assert_eq!(config.services.shutdown_interval, Duration::from_millis(50));
        assert_eq!(config.services.multicast, None);
        assert_eq!(config.links.discover_rate, Duration::from_secs(90));

        let links = config.links.to_config(5000);
        assert_eq!(links.universe, 3);
        assert_eq!(links.port, 5000);
        assert_eq!(config.services.to_config().listen_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        for json in [
            r#"{ "services": { "tick_rate": "soon" } }"#,
            r#"{ "services": { "ping_threshold": "2m" } }"#,
            r#"{ "services": { "shutdown_repeats": 0 } }"#,
            r#"{ "services": { "multicast": "10.0.0.1" } }"#,
            r#"{ "links": { "min_rate": "0s" } }"#,
            r#"{ "unknown": 1 }"#,
        ] {
            assert!(
                matches!(RuntimeConfig::from_json_str(json), Err(CatbusError::Config(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RuntimeConfig::from_json_file("/nonexistent/catbus.json"),
            Err(CatbusError::Config(_))
        ));
    }
}
