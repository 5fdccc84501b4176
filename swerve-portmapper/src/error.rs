//! Errors reported by a [`PortMapper`](crate::PortMapper).
//!
//! Every error carries a stable, non-zero numeric code, exposed through
//! [`PortMapper::last_error`](crate::PortMapper::last_error). Responder result codes are reported
//! verbatim (`1..=5`); local failures use the negative codes of the system NAT traversal service.

use std::{io, sync::Arc};

use crate::nat_pmp::protocol;

/// Code of an unclassified local failure, usually socket I/O.
pub const CODE_UNKNOWN: i32 = -65537;
/// Code of a responder exchange that could not be interpreted.
pub const CODE_NAT_TRAVERSAL: i32 = -65555;
/// Code of a failure to engage the local discovery mechanism.
pub const CODE_SERVICE_NOT_RUNNING: i32 = -65563;
/// Code reported when no gateway could be found.
pub const CODE_NO_ROUTER: i32 = -65566;
/// Code of an exchange that received no answer in time.
pub const CODE_TIMEOUT: i32 = -65568;

/// Reason a mapping attempt ended in [`Phase::Failed`](crate::Phase::Failed), or could not be
/// started.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MappingError {
    /// The responder answered with an error result code.
    #[error("responder refused the request: {0}")]
    Responder(protocol::Error),
    /// The responder sent something that is not a valid answer to our request.
    #[error("invalid reply from responder: {0}")]
    Protocol(protocol::Error),
    /// The responder answered a request we did not make.
    #[error("unexpected reply from responder: {0}")]
    Unexpected(&'static str),
    /// The responder reports no usable external address.
    #[error("responder has no external address")]
    NoExternalAddress,
    /// No answer arrived after every retransmission.
    #[error("no reply from responder after {attempts} attempts")]
    Timeout {
        /// Number of requests sent before giving up.
        attempts: u32,
    },
    /// Sending or receiving failed.
    #[error("transport failure: {0}")]
    Io(Arc<io::Error>),
    /// The local discovery mechanism could not be engaged.
    #[error(transparent)]
    Open(#[from] OpenError),
}

impl MappingError {
    /// Numeric code of this error. Never zero.
    pub fn code(&self) -> i32 {
        match self {
            MappingError::Responder(e) => match e.result_code() {
                Some(code) => i32::from(u16::from(code)),
                None => CODE_NAT_TRAVERSAL,
            },
            MappingError::Protocol(_)
            | MappingError::Unexpected(_)
            | MappingError::NoExternalAddress => CODE_NAT_TRAVERSAL,
            MappingError::Timeout { .. } => CODE_TIMEOUT,
            MappingError::Io(_) => CODE_UNKNOWN,
            MappingError::Open(e) => e.code(),
        }
    }
}

impl From<protocol::Error> for MappingError {
    fn from(e: protocol::Error) -> Self {
        match e.result_code() {
            Some(_) => MappingError::Responder(e),
            None => MappingError::Protocol(e),
        }
    }
}

impl From<io::Error> for MappingError {
    fn from(e: io::Error) -> Self {
        MappingError::Io(Arc::new(e))
    }
}

/// Reason [`PortMapper::try_open`](crate::PortMapper::try_open) could not dispatch a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OpenError {
    /// An earlier attempt of this instance failed. Create a new instance to try again.
    #[error("mapping attempt already failed, a new port mapper is required")]
    Spent,
    /// No default gateway is known and none was configured.
    #[error("no default gateway found")]
    NoGateway,
    /// The discovery socket could not be set up.
    #[error("failed to set up discovery socket: {0}")]
    Socket(Arc<io::Error>),
    /// The port mapper was created outside of a tokio runtime and no handle was given.
    #[error("no tokio runtime available to drive the mapping")]
    NoRuntime,
}

impl OpenError {
    /// Numeric code of this error. Never zero.
    pub fn code(&self) -> i32 {
        match self {
            OpenError::NoGateway => CODE_NO_ROUTER,
            OpenError::Spent | OpenError::Socket(_) | OpenError::NoRuntime => {
                CODE_SERVICE_NOT_RUNNING
            }
        }
    }
}

impl From<io::Error> for OpenError {
    fn from(e: io::Error) -> Self {
        OpenError::Socket(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_codes_are_verbatim() {
        let err = MappingError::from(protocol::Error::NotAuthorizedOrRefused);
        assert!(matches!(err, MappingError::Responder(_)));
        assert_eq!(err.code(), 2);
        assert_eq!(MappingError::from(protocol::Error::UnsupportedOpcode).code(), 5);
    }

    #[test]
    fn local_failures_are_negative() {
        let malformed = MappingError::from(protocol::Error::Malformed);
        assert!(matches!(malformed, MappingError::Protocol(_)));
        assert_eq!(malformed.code(), CODE_NAT_TRAVERSAL);
        assert_eq!(MappingError::Timeout { attempts: 4 }.code(), CODE_TIMEOUT);
        let io = MappingError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(io.code(), CODE_UNKNOWN);
        assert_eq!(MappingError::from(OpenError::NoGateway).code(), CODE_NO_ROUTER);
        assert_eq!(OpenError::Spent.code(), CODE_SERVICE_NOT_RUNNING);
    }
}
