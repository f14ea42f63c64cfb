//! Engine tunables.
//!
//! Loaded from ~/.config/netprobe/config.toml when present; every field is
//! optional in the file and falls back to its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lookup::resolve::AddressFamily;
use crate::probe::{DEFAULT_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE, MIN_PAYLOAD_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between ping echo requests
    #[serde(with = "duration_serde")]
    pub ping_interval: Duration,
    /// Per-query DNS timeout
    #[serde(with = "duration_serde")]
    pub dns_timeout: Duration,
    /// Client-level HTTP timeout
    #[serde(with = "duration_serde")]
    pub http_timeout: Duration,
    /// Per-address reverse DNS timeout for traceroute hops
    #[serde(with = "duration_serde")]
    pub rdns_timeout: Duration,
    /// Echo payload size in bytes
    pub payload_size: usize,
    /// Concurrent TCP connects per port scan (1 = strictly sequential)
    pub scan_concurrency: usize,
    /// Enable reverse DNS lookups for traceroute hops
    pub reverse_dns: bool,
    /// Honor HTTP(S)_PROXY environment variables
    pub http_use_proxy: bool,
    /// Address family preference when a name has both
    pub address_family: AddressFamily,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(500),
            dns_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(15),
            rdns_timeout: Duration::from_secs(2),
            payload_size: DEFAULT_PAYLOAD_SIZE,
            scan_concurrency: 1,
            reverse_dns: true,
            http_use_proxy: true,
            address_family: AddressFamily::Any,
        }
    }
}

impl Config {
    /// Get config file path: ~/.config/netprobe/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("netprobe").join("config.toml"))
    }

    /// Load from the default path (returns default if missing/invalid)
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file: {e:#}");
                Self::default()
            }
        }
    }

    /// Load from an explicit path; errors are reported, not swallowed
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Clamp values that would make the engine misbehave
    pub fn normalized(mut self) -> Self {
        self.scan_concurrency = self.scan_concurrency.clamp(1, 1024);
        self.payload_size = self.payload_size.clamp(MIN_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE);
        self
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.ping_interval, Duration::from_millis(500));
        assert_eq!(config.dns_timeout, Duration::from_secs(5));
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert_eq!(config.payload_size, 32);
        assert_eq!(config.scan_concurrency, 1);
        assert!(config.reverse_dns);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("ping_interval = 0.25\nreverse_dns = false\n").unwrap();
        assert_eq!(config.ping_interval, Duration::from_millis(250));
        assert!(!config.reverse_dns);
        assert_eq!(config.http_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_payload_size_clamped() {
        let config: Config = toml::from_str("payload_size = 9000").unwrap();
        assert_eq!(config.normalized().payload_size, MAX_PAYLOAD_SIZE);

        let config: Config = toml::from_str("payload_size = 0").unwrap();
        assert_eq!(config.normalized().payload_size, MIN_PAYLOAD_SIZE);

        assert_eq!(Config::default().normalized().payload_size, 32);
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(toml::from_str::<Config>("dns_timeout = -1.0").is_err());
    }

    #[test]
    fn test_address_family_names() {
        let config: Config = toml::from_str("address_family = \"v6\"").unwrap();
        assert_eq!(config.address_family, AddressFamily::V6);
    }

    #[test]
    fn test_load_from_reports_errors() {
        let dir = std::env::temp_dir().join(format!("netprobe-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "scan_concurrency = \"lots\"").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));

        fs::write(&path, "scan_concurrency = 0").unwrap();
        assert_eq!(Config::load_from(&path).unwrap().scan_concurrency, 1);

        fs::remove_dir_all(&dir).ok();
    }
}
