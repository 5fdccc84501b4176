//! Configuration for port mapping.

use std::{net::Ipv4Addr, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::nat_pmp::protocol::SERVER_PORT;

/// Recommended lifetime of a NAT-PMP mapping, 2 hours.
///
/// See <https://datatracker.ietf.org/doc/html/rfc6886#section-3.3>
const DEFAULT_MAPPING_LIFETIME: Duration = Duration::from_secs(60 * 60 * 2);

/// First retransmission interval, doubled after every unanswered request.
///
/// See <https://datatracker.ietf.org/doc/html/rfc6886#section-3.1>
const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_millis(250);

/// Requests sent before giving up, roughly 3.75s with the default initial timeout.
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Settings used to talk to the mapping responder.
///
/// Every field has a default, so an empty TOML table is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the responder. Defaults to the system's default IPv4 gateway.
    pub gateway: Option<Ipv4Addr>,
    /// UDP port the responder listens on.
    pub server_port: u16,
    /// Local address to bind the discovery socket to. Defaults to all interfaces.
    pub local_ip: Option<Ipv4Addr>,
    /// Time to wait for the first reply before retransmitting.
    #[serde(with = "humantime_serde")]
    pub initial_timeout: Duration,
    /// Number of requests sent for a single exchange before it times out.
    pub max_attempts: u32,
    /// Lifetime requested for each mapping.
    #[serde(with = "humantime_serde")]
    pub mapping_lifetime: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: None,
            server_port: SERVER_PORT,
            local_ip: None,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            mapping_lifetime: DEFAULT_MAPPING_LIFETIME,
        }
    }
}

impl Config {
    /// Load the config from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        Self::from_toml(&s)
    }

    /// Parse the config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s).context("invalid port mapping config")?;
        Ok(config)
    }

    /// Requested mapping lifetime in whole seconds, as sent on the wire.
    pub(crate) fn lifetime_seconds(&self) -> u32 {
        self.mapping_lifetime.as_secs().try_into().unwrap_or(u32::MAX)
    }

    /// Receive timeout of each attempt of an exchange.
    ///
    /// Starts at [`Config::initial_timeout`] and doubles after every attempt.
    pub(crate) fn attempt_timeouts(&self) -> impl Iterator<Item = Duration> + use<> {
        let initial = self.initial_timeout;
        (0..self.max_attempts.max(1)).map(move |attempt| initial.saturating_mul(1 << attempt.min(16)))
    }
}
