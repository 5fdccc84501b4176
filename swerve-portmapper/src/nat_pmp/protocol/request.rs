use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{Opcode, Version};

/// A NAT-PMP Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Request to determine the gateway's external address.
    ExternalAddress,
    /// Request to register a mapping with the NAT-PMP server.
    Mapping {
        /// Protocol to use for this mapping.
        proto: MapProtocol,
        /// Local port to map.
        local_port: u16,
        /// Preferred external port. Zero lets the server choose.
        external_port: u16,
        /// Requested lifetime in seconds for the mapping.
        lifetime_seconds: u32,
    },
}

/// Protocol for which a port mapping is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum MapProtocol {
    /// UDP mapping.
    #[strum(serialize = "udp")]
    Udp = 1,
    /// TCP mapping.
    #[strum(serialize = "tcp")]
    Tcp = 2,
}

impl Request {
    /// Size of an encoded [`Request::ExternalAddress`].
    pub const EXTERNAL_ADDRESS_SIZE: usize = 1 + // version
        1; // opcode

    /// Size of an encoded [`Request::Mapping`].
    pub const MAPPING_SIZE: usize = 1 + // version
        1 + // opcode
        2 + // reserved
        2 + // local port
        2 + // external port
        4; // lifetime

    /// Encode this [`Request`].
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::ExternalAddress => vec![
                Version::NatPmp.into(),
                Opcode::DetermineExternalAddress.into(),
            ],
            Request::Mapping {
                proto,
                local_port,
                external_port,
                lifetime_seconds,
            } => {
                let opcode = Opcode::from(*proto);
                let mut buf = Vec::with_capacity(Self::MAPPING_SIZE);
                buf.push(Version::NatPmp.into());
                buf.push(opcode.into());
                // reserved
                buf.push(0);
                buf.push(0);
                buf.extend_from_slice(&local_port.to_be_bytes());
                buf.extend_from_slice(&external_port.to_be_bytes());
                buf.extend_from_slice(&lifetime_seconds.to_be_bytes());
                buf
            }
        }
    }

    /// Decode a request, as a server would.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::EXTERNAL_ADDRESS_SIZE {
            return None;
        }
        let _: Version = buf[0].try_into().ok()?;
        let opcode: Opcode = buf[1].try_into().ok()?;
        match opcode {
            Opcode::DetermineExternalAddress => {
                (buf.len() == Self::EXTERNAL_ADDRESS_SIZE).then_some(Request::ExternalAddress)
            }
            Opcode::MapUdp | Opcode::MapTcp => {
                if buf.len() != Self::MAPPING_SIZE {
                    return None;
                }
                let proto = if opcode == Opcode::MapUdp {
                    MapProtocol::Udp
                } else {
                    MapProtocol::Tcp
                };
                let local_port = u16::from_be_bytes([buf[4], buf[5]]);
                let external_port = u16::from_be_bytes([buf[6], buf[7]]);
                let lifetime_seconds = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
                Some(Request::Mapping {
                    proto,
                    local_port,
                    external_port,
                    lifetime_seconds,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_address_request_layout() {
        assert_eq!(Request::ExternalAddress.encode(), vec![0, 0]);
    }

    #[test]
    fn tcp_mapping_request_layout() {
        let req = Request::Mapping {
            proto: MapProtocol::Tcp,
            local_port: 51413,
            external_port: 0,
            lifetime_seconds: 7200,
        };
        let encoded = req.encode();
        assert_eq!(encoded.len(), Request::MAPPING_SIZE);
        assert_eq!(
            encoded,
            vec![0, 2, 0, 0, 0xc8, 0xd5, 0, 0, 0, 0, 0x1c, 0x20]
        );
        assert_eq!(Request::decode(&encoded), Some(req));
    }

    #[test]
    fn decode_rejects_truncated_mapping() {
        let req = Request::Mapping {
            proto: MapProtocol::Udp,
            local_port: 1,
            external_port: 2,
            lifetime_seconds: 3,
        };
        let encoded = req.encode();
        assert_eq!(Request::decode(&encoded[..8]), None);
        assert_eq!(Request::decode(&[1, 0]), None);
    }
}
