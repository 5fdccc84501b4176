//! Errors issuing and exporting certificates.

/// Failure to issue a certificate.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// An earlier attempt of this issuer failed. Create a new issuer to try again.
    #[error("certificate issuance already failed, a new issuer is required")]
    Spent,
    /// The key size matches no supported key type.
    #[error("unsupported key size: {0} bits")]
    UnsupportedKeySize(u32),
    /// The validity window ends before it begins.
    #[error("certificate validity ends before it begins")]
    InvalidValidity,
    /// Key or certificate generation failed.
    #[error("failed to generate certificate: {0}")]
    Generation(#[from] rcgen::Error),
}

/// Failure to export an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// No certificate was issued yet, or issuance failed.
    #[error("no certificate issued")]
    NotIssued,
    /// The archive must be protected by a non-empty password.
    #[error("a password is required")]
    EmptyPassword,
    /// The PKCS#12 archive could not be assembled.
    #[error("failed to build PKCS#12 archive")]
    Pkcs12,
}
