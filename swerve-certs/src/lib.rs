//! Ephemeral self-signed certificates for securing ad hoc connections.
//!
//! A [`CertificateIssuer`] generates one key pair and one self-signed certificate from a
//! [`CertificateRequest`], and exports them as a password protected PKCS#12 archive.
//!
//! ```no_run
//! use swerve_certs::{CertificateIssuer, CertificateRequest, Validity};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = CertificateRequest::new("my peer").with_validity(Validity::Days(10));
//! let mut issuer = CertificateIssuer::new(request);
//! issuer.try_create_self_signed()?;
//! let archive = issuer.create_pkcs12("secret")?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(swerve_docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod error;
mod issuer;
mod validity;

pub use config::CertConfig;
pub use error::{ExportError, IssueError};
pub use issuer::{Certificate, CertificateIssuer, CertificateRequest, random_serial};
pub use validity::{DEFAULT_END_DATE, Validity, days_between};
