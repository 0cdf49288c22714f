//! Router configuration loaded once at process start.

use anyhow::Context;
use embassy_time::Duration;
use serde::Deserialize;
use std::path::Path;

use crate::radio::CsmaConfig;

/// Tunables for the routing core. All fields have defaults matching the
/// deployed network; a `config.toml` can override any subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RouterConfig {
    /// Seconds between periodic differential broadcasts.
    pub broadcast_interval_secs: u64,
    /// Seconds between retry-buffer sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds an acknowledged unicast may wait before retransmission.
    pub ack_timeout_secs: u64,
    /// Retransmissions before a route error is raised.
    pub max_retries: u8,
    /// Flood frames are not forwarded at or beyond this hop count.
    pub max_hops: u8,
    /// Minimum cached-route cost before answering a route request on the
    /// target's behalf.
    pub route_reply_threshold: u8,
    /// Same threshold for answering user lookups from the directory.
    pub user_reply_threshold: u8,
    /// Newest messages kept per offline user.
    pub offline_inbox_cap: usize,
    /// Seconds a buffered payload may wait for discovery before it is
    /// dropped and the sender notified.
    pub pending_ttl_secs: u64,
    /// Pre-shared 128-bit network key, 32 hex digits.
    pub network_key: String,
    /// Carrier-sense backoff policy for the transmit drive loop.
    pub csma: CsmaConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: 60,
            sweep_interval_secs: 60,
            ack_timeout_secs: 3,
            max_retries: 3,
            max_hops: 5,
            route_reply_threshold: 2,
            user_reply_threshold: 2,
            offline_inbox_cap: 10,
            pending_ttl_secs: 60,
            network_key: "00112233445566778899aabbccddeeff".into(),
            csma: CsmaConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", config_path.display()))?;
        config.parse_network_key()?;
        Ok(config)
    }

    /// Decode the configured network key into raw bytes.
    pub fn parse_network_key(&self) -> anyhow::Result<[u8; 16]> {
        let digits = self.network_key.trim();
        anyhow::ensure!(
            digits.len() == 32,
            "network-key must be 32 hex digits, got {}",
            digits.len()
        );
        let mut key = [0u8; 16];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[2 * i..2 * i + 2], 16)
                .context("network-key contains non-hex digits")?;
        }
        Ok(key)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_network() {
        let config = RouterConfig::default();
        assert_eq!(config.broadcast_interval_secs, 60);
        assert_eq!(config.ack_timeout_secs, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.offline_inbox_cap, 10);
        assert_eq!(
            config.parse_network_key().unwrap(),
            [
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
                0xDD, 0xEE, 0xFF
            ]
        );
    }

    #[test]
    fn partial_toml_overrides() {
        let config: RouterConfig =
            toml::from_str("max-hops = 8\nack-timeout-secs = 5\n").unwrap();
        assert_eq!(config.max_hops, 8);
        assert_eq!(config.ack_timeout_secs, 5);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn bad_network_key_rejected() {
        let config = RouterConfig {
            network_key: "zz112233445566778899aabbccddeeff".into(),
            ..RouterConfig::default()
        };
        assert!(config.parse_network_key().is_err());
        let config = RouterConfig {
            network_key: "0011".into(),
            ..RouterConfig::default()
        };
        assert!(config.parse_network_key().is_err());
    }
}
