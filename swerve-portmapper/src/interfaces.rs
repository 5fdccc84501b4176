//! Contains helpers for looking up the default route of the system.

use std::net::Ipv4Addr;

use tracing::debug;

/// Returns the IPv4 address of the default gateway, where the mapping responder lives.
pub fn default_gateway() -> Option<Ipv4Addr> {
    match netdev::get_default_gateway() {
        Ok(gateway) => gateway.ipv4.first().copied(),
        Err(e) => {
            debug!("no default gateway: {e}");
            None
        }
    }
}

/// Returns the primary IPv4 address of the interface holding the default route.
pub fn local_address() -> Option<Ipv4Addr> {
    match netdev::get_default_interface() {
        Ok(iface) => iface
            .ipv4
            .iter()
            .map(|net| net.addr())
            .find(|ip| !ip.is_loopback() && !ip.is_unspecified()),
        Err(e) => {
            debug!("no default interface: {e}");
            None
        }
    }
}

/// Reports whether ip is a private address, according to RFC 1918. That is, it reports whether
/// ip is in 10.0.0.0/8, 172.16.0.0/12, or 192.168.0.0/16.
pub fn is_private(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 10
        || (octets[0] == 172 && octets[1] & 0xf0 == 16)
        || (octets[0] == 192 && octets[1] == 168)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1918_ranges() {
        assert!(is_private(&Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_private(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_private(&Ipv4Addr::new(172, 31, 255, 255)));
        assert!(is_private(&Ipv4Addr::new(192, 168, 1, 10)));

        assert!(!is_private(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(!is_private(&Ipv4Addr::new(172, 15, 0, 1)));
        assert!(!is_private(&Ipv4Addr::new(192, 169, 0, 1)));
        assert!(!is_private(&Ipv4Addr::new(203, 0, 113, 7)));
        assert!(!is_private(&Ipv4Addr::new(100, 64, 0, 1)));
    }
}
