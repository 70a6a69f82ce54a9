use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::network::AddrKey;

/// IFA_F_SECONDARY
pub const IFA_F_SECONDARY: u8 = 0x01;

/// Address request operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrOp {
    Add,
    Delete,
}

/// Filter for address dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFilter {
    All,
    Index(u32),
}

impl AddrFilter {
    pub fn matches(&self, index: u32) -> bool {
        match self {
            AddrFilter::All => true,
            AddrFilter::Index(wanted) => *wanted == index,
        }
    }
}

/// Optional address attributes carried alongside the address key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddrExtras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anycast: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub flags: u8,
}

impl AddrExtras {
    pub fn is_secondary(&self) -> bool {
        self.flags & IFA_F_SECONDARY != 0
    }
}

/// Decoded RTM_NEWADDR / RTM_DELADDR message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMessage {
    pub index: u32,
    pub address: IpAddr,
    pub prefix_len: u8,
    #[serde(default)]
    pub extras: AddrExtras,
    #[serde(default)]
    pub sequence_number: u32,
}

impl AddrMessage {
    pub fn new(index: u32, key: AddrKey) -> Self {
        Self {
            index,
            address: key.addr,
            prefix_len: key.prefix_len,
            extras: AddrExtras::default(),
            sequence_number: 0,
        }
    }

    pub fn key(&self) -> AddrKey {
        AddrKey::new(self.address, self.prefix_len)
    }
}
