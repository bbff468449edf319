//! Endpoint address: a tagged union of `{none, ipv4, ipv6}`, grounded in `next_address.h`'s
//! `next_address_t`. Built on `std::net::SocketAddr` rather than reimplementing octet storage,
//! since the standard library already gives us parse/format/equality for free; a v4 address
//! mapped into v6 is collapsed to plain v4 on construction, matching
//! `next_address_parse`'s IPv4-mapped-IPv6 handling.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

/// Max bytes [`Address::write_filter_bytes`] can write (16-byte ipv6 address + 2-byte port).
pub const ADDRESS_FILTER_BYTES: usize = 18;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Address {
    None,
    V4(SocketAddrV4),
    V6(SocketAddrV6),
}

impl Address {
    #[inline]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::V4(v4),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4() {
                Some(mapped) => Address::V4(SocketAddrV4::new(mapped, v6.port())),
                None => Address::V6(v6),
            },
        }
    }

    #[inline]
    pub fn to_socket_addr(self) -> Option<SocketAddr> {
        match self {
            Address::None => None,
            Address::V4(v4) => Some(SocketAddr::V4(v4)),
            Address::V6(v6) => Some(SocketAddr::V6(v6)),
        }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self, Address::None)
    }

    /// Big-endian encoding used by route/continue tokens: `ipv4.octets()` are already in network
    /// byte order, so this is a plain copy; returns `[0; 4]` for non-v4 addresses.
    #[inline]
    pub fn v4_octets_be(self) -> [u8; 4] {
        match self {
            Address::V4(v4) => v4.ip().octets(),
            _ => [0; 4],
        }
    }

    #[inline]
    pub fn port(self) -> u16 {
        match self {
            Address::None => 0,
            Address::V4(v4) => v4.port(),
            Address::V6(v6) => v6.port(),
        }
    }

    /// Writes the bytes fed into the packet-filter pittle/chonkle into `out[..n]` and returns
    /// `n`: the raw address octets (4 or 16) plus the big-endian port, or a single zero byte for
    /// `None` — any fixed, order-sensitive encoding works as long as both endpoints agree, which
    /// they do since it's derived identically on each side from the same socket addresses. `out`
    /// must be at least [`ADDRESS_FILTER_BYTES`] long. Takes a fixed buffer rather than a `Vec`
    /// since this runs on the hot packet-filter path.
    pub fn write_filter_bytes(self, out: &mut [u8]) -> usize {
        match self {
            Address::None => {
                out[0] = 0;
                1
            }
            Address::V4(v4) => {
                out[0..4].copy_from_slice(&v4.ip().octets());
                out[4..6].copy_from_slice(&v4.port().to_be_bytes());
                6
            }
            Address::V6(v6) => {
                out[0..16].copy_from_slice(&v6.ip().octets());
                out[16..18].copy_from_slice(&v6.port().to_be_bytes());
                18
            }
        }
    }

    pub fn from_v4_be(octets: [u8; 4], port: u16) -> Self {
        if octets == [0; 4] && port == 0 {
            return Address::None;
        }
        Address::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::None => write!(f, "none"),
            Address::V4(v4) => write!(f, "{}", v4),
            Address::V6(v6) => write!(f, "[{}]:{}", v6.ip(), v6.port()),
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "none" {
            return Ok(Address::None);
        }

        let socket_addr: SocketAddr = s.parse().map_err(|_| AddressParseError)?;
        Ok(Address::from_socket_addr(socket_addr))
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct AddressParseError;

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse address")
    }
}

impl std::error::Error for AddressParseError {}

impl Default for Address {
    #[inline]
    fn default() -> Self {
        Address::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trip() {
        let addr: Address = "1.2.3.4:5".parse().unwrap();
        assert_eq!(addr.to_string(), "1.2.3.4:5");
    }

    #[test]
    fn v6_round_trip() {
        let addr: Address = "[::1]:40000".parse().unwrap();
        assert_eq!(addr.to_string(), "[::1]:40000");
    }

    #[test]
    fn none_round_trip() {
        let addr: Address = "none".parse().unwrap();
        assert!(addr.is_none());
        assert_eq!(addr.to_string(), "none");
    }

    #[test]
    fn v4_mapped_v6_collapses_to_v4() {
        let mapped: SocketAddr = "[::ffff:1.2.3.4]:9000".parse().unwrap();
        let addr = Address::from_socket_addr(mapped);
        assert_eq!(addr, Address::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 9000)));
    }

    #[test]
    fn equality_is_structural() {
        let a: Address = "1.2.3.4:5".parse().unwrap();
        let b: Address = "1.2.3.4:5".parse().unwrap();
        let c: Address = "1.2.3.4:6".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
