//! IP address, CIDR and inclusive range utilities.
//!
//! Provides [`Cidr`] for IPv4/IPv6 prefixes and [`IpRange`], the inclusive
//! `start..=end` span every service tag and rule address resolves to.

use crate::error::{Error, Result};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Prefix length of a full IPv4 address.
pub const MAX_LENGTH_V4: u8 = 32;
/// Prefix length of a full IPv6 address.
pub const MAX_LENGTH_V6: u8 = 128;

fn max_length(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => MAX_LENGTH_V4,
        IpAddr::V6(_) => MAX_LENGTH_V6,
    }
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn from_bits(bits: u128, like: &IpAddr) -> IpAddr {
    match like {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

/// Convert a prefix length to a network mask, right-aligned in a u128.
///
/// # Arguments
/// * `len` - The prefix length
/// * `max_len` - 32 for IPv4, 128 for IPv6
///
/// # Examples
/// ```
/// use azure_network_topology::models::get_cidr_mask;
/// assert_eq!(get_cidr_mask(24, 32).unwrap(), 0xFFFFFF00);
/// ```
pub fn get_cidr_mask(len: u8, max_len: u8) -> Result<u128> {
    if len > max_len {
        return Err(Error::InvalidCidr(format!("prefix /{len} longer than {max_len}")));
    }
    let all_bits: u128 = if max_len == MAX_LENGTH_V6 {
        u128::MAX
    } else {
        (1u128 << max_len) - 1
    };
    let right_len = (max_len - len) as u32;
    Ok(all_bits.checked_shr(right_len).unwrap_or(0).checked_shl(right_len).unwrap_or(0) & all_bits)
}

/// Network (lowest) address of `addr` for prefix length `len`.
pub fn cut_addr(addr: IpAddr, len: u8) -> Result<IpAddr> {
    let mask = get_cidr_mask(len, max_length(&addr))?;
    Ok(from_bits(to_bits(&addr) & mask, &addr))
}

/// Broadcast (highest) address of `addr` for prefix length `len`.
pub fn broadcast_addr(addr: IpAddr, len: u8) -> Result<IpAddr> {
    let max_len = max_length(&addr);
    let mask = get_cidr_mask(len, max_len)?;
    let host_bits = get_cidr_mask(max_len, max_len)? & !mask;
    Ok(from_bits((to_bits(&addr) & mask) | host_bits, &addr))
}

/// An address with a prefix length, e.g. `10.0.0.0/16` or `fd00::/8`.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct Cidr {
    pub addr: IpAddr,
    pub mask: u8,
}

impl Cidr {
    /// Parse a CIDR string (e.g. "10.0.0.0/24").
    pub fn new(addr_cidr: &str) -> Result<Cidr> {
        let addr_cidr = addr_cidr.trim();
        let (addr, mask) = addr_cidr
            .split_once('/')
            .ok_or_else(|| Error::InvalidCidr(addr_cidr.to_string()))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::InvalidCidr(addr_cidr.to_string()))?;
        let mask: u8 = mask
            .parse()
            .map_err(|_| Error::InvalidCidr(addr_cidr.to_string()))?;
        if mask > max_length(&addr) {
            return Err(Error::InvalidCidr(addr_cidr.to_string()));
        }
        Ok(Cidr { addr, mask })
    }

    /// Lowest (network) address.
    pub fn lo(&self) -> IpAddr {
        let mask = get_cidr_mask(self.mask, max_length(&self.addr)).unwrap_or(0);
        from_bits(to_bits(&self.addr) & mask, &self.addr)
    }

    /// Highest (broadcast) address.
    pub fn hi(&self) -> IpAddr {
        broadcast_addr(self.addr, self.mask).unwrap_or(self.addr)
    }

    pub fn range(&self) -> IpRange {
        IpRange {
            start: self.lo(),
            end: self.hi(),
        }
    }
}

impl FromStr for Cidr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Cidr> {
        Cidr::new(s)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}

impl Serialize for Cidr {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Cidr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cidr::new(&s).map_err(de::Error::custom)
    }
}

/// Inclusive address range. Serialized as `{"start": "...", "end": "..."}`.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Copy, Clone, Hash)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    pub fn single(addr: IpAddr) -> IpRange {
        IpRange {
            start: addr,
            end: addr,
        }
    }

    /// The whole IPv4 space, `0.0.0.0-255.255.255.255`.
    pub fn full_ipv4() -> IpRange {
        IpRange {
            start: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            end: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }

    pub fn is_full_ipv4(&self) -> bool {
        *self == IpRange::full_ipv4()
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Inclusive membership test. Addresses of the other family never match,
    /// except IPv4-mapped IPv6 addresses which are compared as IPv4.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) if self.start.is_ipv4() => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => return false,
            },
            other => other,
        };
        if ip.is_ipv4() != self.start.is_ipv4() || ip.is_ipv4() != self.end.is_ipv4() {
            return false;
        }
        let bits = to_bits(&ip);
        to_bits(&self.start) <= bits && bits <= to_bits(&self.end)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
