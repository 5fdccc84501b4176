//! Defaults for issued certificates, loadable from TOML.

use serde::{Deserialize, Serialize};

use crate::{CertificateRequest, Validity};

/// RSA key size used when none is configured.
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Subject common name used when none is configured.
pub const DEFAULT_LABEL: &str = "swerve";

/// Settings used to build a [`CertificateRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    /// Subject common name.
    pub label: String,
    /// Key size in bits: 2048, 3072 or 4096 for RSA, 256 or 384 for ECDSA.
    pub key_bits: u32,
    /// Days of validity. Defaults to [`DEFAULT_END_DATE`](crate::DEFAULT_END_DATE).
    pub validity_days: Option<u32>,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            key_bits: DEFAULT_KEY_BITS,
            validity_days: None,
        }
    }
}

impl CertConfig {
    /// A request following these settings, with a random serial.
    pub fn request(&self) -> CertificateRequest {
        let validity = match self.validity_days {
            Some(days) => Validity::Days(days),
            None => Validity::default(),
        };
        CertificateRequest::new(&self.label)
            .with_validity(validity)
            .with_key_bits(self.key_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: CertConfig = toml::from_str("").unwrap();
        assert_eq!(config, CertConfig::default());
        assert_eq!(config.request().validity, Validity::default());
    }

    #[test]
    fn partial_table() {
        let config: CertConfig = toml::from_str(
            r#"
            label = "lan peer"
            validity_days = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.key_bits, DEFAULT_KEY_BITS);
        let request = config.request();
        assert_eq!(request.label, "lan peer");
        assert_eq!(request.validity, Validity::Days(10));
    }
}
