//! Definitions and utilities to interact with a NAT-PMP server.

mod request;
mod response;

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub use request::*;
pub use response::*;

/// Port to use when acting as a server. This is the one we direct requests to.
///
/// PCP and NAT-PMP share the same port, reassigned by IANA from the older version to the new
/// one. See <https://datatracker.ietf.org/doc/html/rfc6887#section-19>
pub const SERVER_PORT: u16 = 5351;

/// Nat Version according to [RFC 6886 Transition to Port Control Protocol](https://datatracker.ietf.org/doc/html/rfc6886#section-1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum Version {
    /// NAT-PMP version
    NatPmp = 0,
}

/// Opcode accepted by a NAT-PMP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum Opcode {
    /// Determine the external address of the gateway.
    ///
    /// See [RFC 6886 Determining the External Address](https://datatracker.ietf.org/doc/html/rfc6886#section-3.2).
    DetermineExternalAddress = 0,
    /// Get a UDP Mapping.
    ///
    /// See [RFC 6886 Requesting a Mapping](https://datatracker.ietf.org/doc/html/rfc6886#section-3.3).
    MapUdp = 1,
    /// Get a TCP Mapping.
    ///
    /// See [RFC 6886 Requesting a Mapping](https://datatracker.ietf.org/doc/html/rfc6886#section-3.3).
    MapTcp = 2,
}

impl From<MapProtocol> for Opcode {
    fn from(proto: MapProtocol) -> Self {
        match proto {
            MapProtocol::Udp => Opcode::MapUdp,
            MapProtocol::Tcp => Opcode::MapTcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn version_repr_identity() {
        for v in Version::iter() {
            let byte: u8 = v.into();
            assert_eq!(Version::try_from(byte).ok(), Some(v));
        }
    }

    #[test]
    fn opcode_repr_identity() {
        for o in Opcode::iter() {
            let byte: u8 = o.into();
            assert_eq!(Opcode::try_from(byte).ok(), Some(o));
        }
    }

    #[test]
    fn result_code_repr_identity() {
        for rc in ResultCode::iter() {
            let code: u16 = rc.into();
            assert_eq!(ResultCode::try_from(code).ok(), Some(rc));
        }
    }

    #[test]
    fn map_protocol_opcodes() {
        assert_eq!(Opcode::from(MapProtocol::Udp), Opcode::MapUdp);
        assert_eq!(Opcode::from(MapProtocol::Tcp), Opcode::MapTcp);
        let udp: u8 = MapProtocol::Udp.into();
        let tcp: u8 = MapProtocol::Tcp.into();
        assert_eq!(udp, u8::from(Opcode::MapUdp));
        assert_eq!(tcp, u8::from(Opcode::MapTcp));
    }
}
