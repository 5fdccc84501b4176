//! Single-use self-signed certificate issuance.

use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_RSA_SHA256,
    RsaKeySize, SerialNumber,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    config::DEFAULT_KEY_BITS,
    error::{ExportError, IssueError},
    validity::Validity,
};

/// A random positive 31 bit serial number.
pub fn random_serial() -> u32 {
    serial_from(&mut rand::thread_rng())
}

fn serial_from<R: RngCore>(rng: &mut R) -> u32 {
    (rng.next_u32() >> 1).max(1)
}

/// What to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Subject common name.
    pub label: String,
    /// End of the validity window.
    pub validity: Validity,
    /// Key size in bits. 2048, 3072 and 4096 select RSA, 256 and 384 select ECDSA.
    pub key_bits: u32,
    /// Serial number of the certificate.
    pub serial: u32,
}

impl CertificateRequest {
    /// A request for a 2048 bit RSA certificate valid until
    /// [`DEFAULT_END_DATE`](crate::DEFAULT_END_DATE), with a random serial.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            validity: Validity::default(),
            key_bits: DEFAULT_KEY_BITS,
            serial: random_serial(),
        }
    }

    /// Set the validity window.
    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    /// Set the key size.
    pub fn with_key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Set the serial number.
    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }
}

/// An issued self-signed certificate and its private key.
#[derive(derive_more::Debug, Clone)]
pub struct Certificate {
    label: String,
    serial: u32,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    #[debug("{} bytes", cert_der.len())]
    cert_der: Vec<u8>,
    #[debug(skip)]
    key_der: Vec<u8>,
    #[debug(skip)]
    cert_pem: String,
    #[debug(skip)]
    key_pem: String,
}

impl Certificate {
    /// Subject common name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Serial number.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// DER encoded certificate.
    pub fn der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PKCS#8 DER encoded private key.
    pub fn key_der(&self) -> &[u8] {
        &self.key_der
    }

    /// PEM encoded certificate.
    pub fn pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM encoded private key.
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Bundle the certificate and its key in a PKCS#12 archive protected by `password`.
    pub fn to_pkcs12(&self, password: &str) -> Result<Vec<u8>, ExportError> {
        if password.is_empty() {
            return Err(ExportError::EmptyPassword);
        }
        let pfx = p12::PFX::new(&self.cert_der, &self.key_der, None, password, &self.label)
            .ok_or(ExportError::Pkcs12)?;
        Ok(pfx.to_der())
    }
}

#[derive(Debug)]
enum State {
    Pending(CertificateRequest),
    Issued(Certificate),
    Spent,
}

/// Issues one self-signed certificate.
///
/// The first call to [`CertificateIssuer::try_create_self_signed`] generates the key and the
/// certificate. Later calls return the same certificate, or [`IssueError::Spent`] if the first
/// one failed: a failed issuer never tries again.
#[derive(Debug)]
pub struct CertificateIssuer {
    state: State,
}

impl CertificateIssuer {
    /// An issuer for `request`. Nothing is generated until asked.
    pub fn new(request: CertificateRequest) -> Self {
        Self {
            state: State::Pending(request),
        }
    }

    /// Generate the certificate, or return the one generated earlier.
    pub fn try_create_self_signed(&mut self) -> Result<&Certificate, IssueError> {
        match std::mem::replace(&mut self.state, State::Spent) {
            State::Pending(request) => match issue(&request, OffsetDateTime::now_utc()) {
                Ok(certificate) => {
                    info!(
                        serial = certificate.serial,
                        "issued certificate for {:?} valid until {}",
                        certificate.label,
                        certificate.not_after
                    );
                    self.state = State::Issued(certificate);
                }
                Err(e) => {
                    warn!("failed to issue certificate for {:?}: {e}", request.label);
                    return Err(e);
                }
            },
            State::Issued(certificate) => self.state = State::Issued(certificate),
            State::Spent => return Err(IssueError::Spent),
        }
        match &self.state {
            State::Issued(certificate) => Ok(certificate),
            State::Pending(_) | State::Spent => Err(IssueError::Spent),
        }
    }

    /// Like [`CertificateIssuer::try_create_self_signed`], logging the error away.
    pub fn create_self_signed(&mut self) -> Option<&Certificate> {
        self.try_create_self_signed().ok()
    }

    /// The issued certificate, if any.
    pub fn certificate(&self) -> Option<&Certificate> {
        match &self.state {
            State::Issued(certificate) => Some(certificate),
            State::Pending(_) | State::Spent => None,
        }
    }

    /// Whether issuance failed.
    pub fn is_spent(&self) -> bool {
        matches!(self.state, State::Spent)
    }

    /// Export the issued certificate and its key as a PKCS#12 archive protected by `password`.
    pub fn create_pkcs12(&self, password: &str) -> Result<Vec<u8>, ExportError> {
        self.certificate()
            .ok_or(ExportError::NotIssued)?
            .to_pkcs12(password)
    }
}

fn key_pair(bits: u32) -> Result<KeyPair, IssueError> {
    let key_pair = match bits {
        2048 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048),
        3072 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_3072),
        4096 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_4096),
        256 => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256),
        384 => KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384),
        other => return Err(IssueError::UnsupportedKeySize(other)),
    };
    Ok(key_pair?)
}

fn issue(request: &CertificateRequest, now: OffsetDateTime) -> Result<Certificate, IssueError> {
    let not_after = request.validity.not_after(now)?;
    debug!(
        bits = request.key_bits,
        serial = request.serial,
        "generating key for {:?}",
        request.label
    );
    let key_pair = key_pair(request.key_bits)?;

    let mut params = CertificateParams::default();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, request.label.as_str());
    params.distinguished_name = name;
    params.serial_number = Some(SerialNumber::from_slice(&request.serial.to_be_bytes()));
    params.not_before = now;
    params.not_after = not_after;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params.self_signed(&key_pair)?;

    Ok(Certificate {
        label: request.label.clone(),
        serial: request.serial,
        not_before: now,
        not_after,
        cert_der: cert.der().to_vec(),
        key_der: key_pair.serialize_der(),
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}
