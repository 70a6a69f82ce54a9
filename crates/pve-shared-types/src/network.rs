use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;

/// Key of an interface address: the address itself plus its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddrKey {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl AddrKey {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    pub fn to_ipnet(&self) -> Option<IpNet> {
        match self.addr {
            IpAddr::V4(addr) => Ipv4Net::new(addr, self.prefix_len).ok().map(IpNet::V4),
            IpAddr::V6(addr) => Ipv6Net::new(addr, self.prefix_len).ok().map(IpNet::V6),
        }
    }

    pub fn same_network(&self, other: &AddrKey) -> bool {
        match (self.to_ipnet(), other.to_ipnet()) {
            (Some(net1), Some(net2)) => net1.trunc() == net2.trunc(),
            _ => false,
        }
    }

    /// Automatic IPv6 link-local address (fe80::/64), managed by the kernel.
    pub fn is_ipv6_link_local(&self) -> bool {
        match self.addr {
            IpAddr::V6(addr) => (addr.segments()[0] & 0xffc0) == 0xfe80 && self.prefix_len == 64,
            IpAddr::V4(_) => false,
        }
    }
}

/// Convert a dotted-quad netmask into a prefix length.
fn dotted_mask_to_prefix(mask: &str) -> Option<u8> {
    let mask: std::net::Ipv4Addr = mask.parse().ok()?;
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    // only contiguous masks are valid
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return None;
    }
    Some(prefix as u8)
}

impl FromStr for AddrKey {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, mask) = s.split_once('/').ok_or(SharedTypeError::InvalidValue {
            field: "ip_address",
            value: s.to_string(),
        })?;
        let addr = addr
            .parse::<IpAddr>()
            .map_err(|_| SharedTypeError::InvalidValue {
                field: "ip_address",
                value: s.to_string(),
            })?;
        let prefix_len = if mask.contains('.') {
            dotted_mask_to_prefix(mask)
        } else {
            mask.parse::<u8>().ok()
        }
        .ok_or(SharedTypeError::InvalidValue {
            field: "prefix_length",
            value: mask.to_string(),
        })?;

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(SharedTypeError::InvalidValue {
                field: "prefix_length",
                value: mask.to_string(),
            });
        }
        Ok(AddrKey::new(addr, prefix_len))
    }
}

impl TryFrom<String> for AddrKey {
    type Error = SharedTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddrKey> for String {
    fn from(key: AddrKey) -> Self {
        key.to_string()
    }
}

impl std::fmt::Display for AddrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub MacAddress);

impl MacAddr {
    /// `00:00:00:00:00:00` asks the kernel to generate an address by itself.
    pub fn is_placeholder(&self) -> bool {
        self.0.bytes() == [0u8; 6]
    }
}

struct MacAddrVisitor;

impl<'de> serde::de::Visitor<'de> for MacAddrVisitor {
    type Value = MacAddr;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a MAC address string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse::<MacAddress>()
            .map(MacAddr)
            .map_err(|_| E::custom(format!("invalid MAC address: {}", v)))
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(MacAddrVisitor)
    }
}

impl Serialize for MacAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl FromStr for MacAddr {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<MacAddress>()
            .map(MacAddr)
            .map_err(|_| SharedTypeError::InvalidValue {
                field: "mac_address",
                value: s.to_string(),
            })
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0.bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}
