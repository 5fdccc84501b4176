//! A NAT-PMP response encoding and decoding.

use std::net::Ipv4Addr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{MapProtocol, Opcode, Version};

/// A NAT-PMP successful Response/Notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Response to a [`Opcode::DetermineExternalAddress`] request.
    PublicAddress {
        /// Epoch time of the server.
        epoch_time: u32,
        /// External address of the gateway.
        public_ip: Ipv4Addr,
    },
    /// Response to a [`Opcode::MapUdp`] or [`Opcode::MapTcp`] request.
    PortMap {
        /// Protocol for which the mapping was requested.
        proto: MapProtocol,
        /// Epoch time of the server.
        epoch_time: u32,
        /// Local port for which the mapping was created.
        private_port: u16,
        /// External port registered for this mapping.
        external_port: u16,
        /// Lifetime in seconds that can be assumed by this mapping.
        lifetime_seconds: u32,
    },
}

/// Result code obtained in a NAT-PMP response.
///
/// See [RFC 6886 Result Codes](https://datatracker.ietf.org/doc/html/rfc6886#section-3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u16)]
pub enum ResultCode {
    /// A successful response.
    Success = 0,
    /// The sent version is not supported by the NAT-PMP server.
    UnsupportedVersion = 1,
    /// Functionality is supported but not allowed: e.g. box supports mapping, but user has turned
    /// feature off.
    NotAuthorizedOrRefused = 2,
    /// Network failures, e.g. NAT device itself has not obtained a DHCP lease.
    NetworkFailure = 3,
    /// NAT-PMP server cannot create any more mappings at this time.
    OutOfResources = 4,
    /// Opcode is not supported by the server.
    UnsupportedOpcode = 5,
}

/// Errors that can occur when decoding a [`Response`] from a server.
#[derive(Debug, derive_more::Display, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Response is too short or is otherwise malformed.
    #[display("Response is malformed")]
    Malformed,
    /// The [`Response::RESPONSE_INDICATOR`] is not present.
    #[display("Packet does not appear to be a response")]
    NotAResponse,
    /// The received opcode is not recognized.
    #[display("Invalid Opcode received")]
    InvalidOpcode,
    /// The received version is not recognized.
    #[display("Invalid version received")]
    InvalidVersion,
    /// The received result code is not recognized.
    #[display("Invalid result code received")]
    InvalidResultCode,
    /// Received an error code indicating the server does not support the sent version.
    #[display("Server does not support the version")]
    UnsupportedVersion,
    /// Received an error code indicating the operation is supported but not authorized.
    #[display("Operation is supported but not authorized")]
    NotAuthorizedOrRefused,
    /// Received an error code indicating the server experienced a network failure
    #[display("Server experienced a network failure")]
    NetworkFailure,
    /// Received an error code indicating the server cannot create more mappings at this time.
    #[display("Server is out of resources")]
    OutOfResources,
    /// Received an error code indicating the Opcode is not supported by the server.
    #[display("Server does not support this opcode")]
    UnsupportedOpcode,
}

impl Error {
    /// The [`ResultCode`] reported by the server, if this error was reported by it.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Error::UnsupportedVersion => Some(ResultCode::UnsupportedVersion),
            Error::NotAuthorizedOrRefused => Some(ResultCode::NotAuthorizedOrRefused),
            Error::NetworkFailure => Some(ResultCode::NetworkFailure),
            Error::OutOfResources => Some(ResultCode::OutOfResources),
            Error::UnsupportedOpcode => Some(ResultCode::UnsupportedOpcode),
            Error::Malformed
            | Error::NotAResponse
            | Error::InvalidOpcode
            | Error::InvalidVersion
            | Error::InvalidResultCode => None,
        }
    }
}

impl Response {
    /// Size of the header common to all responses.
    const HEADER_SIZE: usize = 1 + // version
        1 + // opcode
        2; // result code

    /// Minimum size of an encoded [`Response`] sent by a server to this client.
    pub const MIN_SIZE: usize = // parts of a public ip response
        Self::HEADER_SIZE +
        4 + // epoch time
        4; // public ip

    /// Maximum size of an encoded [`Response`] sent by a server to this client.
    pub const MAX_SIZE: usize = // parts of mapping response
        Self::HEADER_SIZE +
        4 + // epoch time
        2 + // private port
        2 + // public port
        4; // lifetime

    /// Indicator ORd into the [`Opcode`] to indicate a response packet.
    pub const RESPONSE_INDICATOR: u8 = 1u8 << 7;

    /// Opcode of the request this response answers.
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::PublicAddress { .. } => Opcode::DetermineExternalAddress,
            Response::PortMap { proto, .. } => Opcode::from(*proto),
        }
    }

    /// Decode a response.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::HEADER_SIZE || buf.len() > Self::MAX_SIZE {
            return Err(Error::Malformed);
        }
        let _: Version = buf[0].try_into().map_err(|_| Error::InvalidVersion)?;
        let opcode = buf[1];
        if opcode & Self::RESPONSE_INDICATOR != Self::RESPONSE_INDICATOR {
            return Err(Error::NotAResponse);
        }
        let opcode: Opcode = (opcode & !Self::RESPONSE_INDICATOR)
            .try_into()
            .map_err(|_| Error::InvalidOpcode)?;

        let result_code = u16::from_be_bytes([buf[2], buf[3]])
            .try_into()
            .map_err(|_| Error::InvalidResultCode)?;

        match result_code {
            ResultCode::Success => Ok(()),
            ResultCode::UnsupportedVersion => Err(Error::UnsupportedVersion),
            ResultCode::NotAuthorizedOrRefused => Err(Error::NotAuthorizedOrRefused),
            ResultCode::NetworkFailure => Err(Error::NetworkFailure),
            ResultCode::OutOfResources => Err(Error::OutOfResources),
            ResultCode::UnsupportedOpcode => Err(Error::UnsupportedOpcode),
        }?;

        let epoch_time = || u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let response = match opcode {
            Opcode::DetermineExternalAddress => {
                if buf.len() != Self::MIN_SIZE {
                    return Err(Error::Malformed);
                }
                let public_ip = Ipv4Addr::new(buf[8], buf[9], buf[10], buf[11]);
                Response::PublicAddress {
                    epoch_time: epoch_time(),
                    public_ip,
                }
            }
            Opcode::MapUdp | Opcode::MapTcp => {
                if buf.len() != Self::MAX_SIZE {
                    return Err(Error::Malformed);
                }
                let proto = if opcode == Opcode::MapUdp {
                    MapProtocol::Udp
                } else {
                    MapProtocol::Tcp
                };

                let private_port = u16::from_be_bytes([buf[8], buf[9]]);
                let external_port = u16::from_be_bytes([buf[10], buf[11]]);
                let lifetime_seconds = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

                Response::PortMap {
                    proto,
                    epoch_time: epoch_time(),
                    private_port,
                    external_port,
                    lifetime_seconds,
                }
            }
        };

        Ok(response)
    }

    /// Encode a successful response, as a server would.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn encode(&self) -> Vec<u8> {
        let opcode: u8 = self.opcode().into();
        let mut buf = Vec::with_capacity(Self::MAX_SIZE);
        buf.push(Version::NatPmp.into());
        buf.push(Self::RESPONSE_INDICATOR | opcode);
        let result_code: u16 = ResultCode::Success.into();
        buf.extend_from_slice(&result_code.to_be_bytes());
        match self {
            Response::PublicAddress {
                epoch_time,
                public_ip,
            } => {
                buf.extend_from_slice(&epoch_time.to_be_bytes());
                buf.extend_from_slice(&public_ip.octets());
            }
            Response::PortMap {
                proto: _,
                epoch_time,
                private_port,
                external_port,
                lifetime_seconds,
            } => {
                buf.extend_from_slice(&epoch_time.to_be_bytes());
                buf.extend_from_slice(&private_port.to_be_bytes());
                buf.extend_from_slice(&external_port.to_be_bytes());
                buf.extend_from_slice(&lifetime_seconds.to_be_bytes());
            }
        }
        buf
    }

    /// Encode an error response for the given opcode, as a server would.
    ///
    /// The packet keeps the full size of a response for that opcode, with the body zeroed.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn encode_error(opcode: Opcode, result_code: ResultCode, epoch_time: u32) -> Vec<u8> {
        let size = match opcode {
            Opcode::DetermineExternalAddress => Self::MIN_SIZE,
            Opcode::MapUdp | Opcode::MapTcp => Self::MAX_SIZE,
        };
        let opcode: u8 = opcode.into();
        let result_code: u16 = result_code.into();
        let mut buf = vec![0u8; size];
        buf[0] = Version::NatPmp.into();
        buf[1] = Self::RESPONSE_INDICATOR | opcode;
        buf[2..4].copy_from_slice(&result_code.to_be_bytes());
        buf[4..8].copy_from_slice(&epoch_time.to_be_bytes());
        buf
    }

    #[cfg(test)]
    fn random<R: rand::RngCore>(opcode: Opcode, rng: &mut R) -> Self {
        match opcode {
            Opcode::DetermineExternalAddress => Response::PublicAddress {
                epoch_time: rng.next_u32(),
                public_ip: rng.next_u32().into(),
            },
            Opcode::MapUdp | Opcode::MapTcp => Response::PortMap {
                proto: if opcode == Opcode::MapUdp {
                    MapProtocol::Udp
                } else {
                    MapProtocol::Tcp
                },
                epoch_time: rng.next_u32(),
                private_port: rng.next_u32() as u16,
                external_port: rng.next_u32() as u16,
                lifetime_seconds: rng.next_u32(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_decode_external_addr_response() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);

        let response = Response::random(Opcode::DetermineExternalAddress, &mut rng);
        let encoded = response.encode();
        assert_eq!(Ok(response), Response::decode(&encoded));
    }

    #[test]
    fn test_decode_tcp_map_response() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);

        let response = Response::random(Opcode::MapTcp, &mut rng);
        let encoded = response.encode();
        assert_eq!(encoded[1], 0x82);
        assert_eq!(Ok(response), Response::decode(&encoded));
    }

    #[test]
    fn test_decode_known_external_addr_packet() {
        let packet = [0, 0x80, 0, 0, 0, 0, 0x01, 0x00, 203, 0, 113, 7];
        assert_eq!(
            Response::decode(&packet),
            Ok(Response::PublicAddress {
                epoch_time: 256,
                public_ip: Ipv4Addr::new(203, 0, 113, 7),
            })
        );
    }

    #[test]
    fn test_decode_error_result_codes() {
        let packet = Response::encode_error(Opcode::MapTcp, ResultCode::OutOfResources, 9);
        let err = Response::decode(&packet).unwrap_err();
        assert_eq!(err, Error::OutOfResources);
        assert_eq!(err.result_code(), Some(ResultCode::OutOfResources));

        let packet = Response::encode_error(
            Opcode::DetermineExternalAddress,
            ResultCode::NetworkFailure,
            0,
        );
        assert_eq!(Response::decode(&packet), Err(Error::NetworkFailure));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // a request echoed back is not a response
        assert_eq!(Response::decode(&[0, 0, 0, 0]), Err(Error::NotAResponse));
        assert_eq!(Response::decode(&[2, 0x80, 0, 0]), Err(Error::InvalidVersion));
        assert_eq!(Response::decode(&[0, 0x83, 0, 0]), Err(Error::InvalidOpcode));
        assert_eq!(Response::decode(&[0, 0x80, 0, 9]), Err(Error::InvalidResultCode));
        assert_eq!(Response::decode(&[0]), Err(Error::Malformed));
        // a successful map response cut short
        let packet = Response::PortMap {
            proto: MapProtocol::Udp,
            epoch_time: 1,
            private_port: 2,
            external_port: 3,
            lifetime_seconds: 4,
        }
        .encode();
        assert_eq!(Response::decode(&packet[..12]), Err(Error::Malformed));
        assert_eq!(Error::Malformed.result_code(), None);
    }
}
