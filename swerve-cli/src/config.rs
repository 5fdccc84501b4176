//! Configuration file of the `swerve` binary.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use swerve_certs::CertConfig;

/// Top level of the config file. Both sections are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// `[portmapper]` section.
    pub portmapper: swerve_portmapper::Config,
    /// `[certificate]` section.
    pub certificate: CertConfig,
}

impl CliConfig {
    /// Load the config from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<CliConfig> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: CliConfig = toml::from_str(&s).context("invalid config")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn load_sections() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("swerve.toml");
        tokio::fs::write(
            &path,
            r#"
            [portmapper]
            gateway = "192.168.1.1"
            initial_timeout = "100ms"

            [certificate]
            label = "lan peer"
            key_bits = 4096
            "#,
        )
        .await?;

        let config = CliConfig::load(&path).await?;
        assert_eq!(
            config.portmapper.gateway,
            Some("192.168.1.1".parse().unwrap())
        );
        assert_eq!(config.portmapper.initial_timeout, Duration::from_millis(100));
        assert_eq!(config.portmapper.max_attempts, 4);
        assert_eq!(config.certificate.key_bits, 4096);
        assert_eq!(config.certificate.validity_days, None);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = CliConfig::load("/nonexistent/swerve.toml").await.unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
