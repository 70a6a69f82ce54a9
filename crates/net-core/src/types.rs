//! Core network types and link flag constants

use crate::error::{ConfigError, NetworkError};
use pve_shared_types::SharedTypeError;

pub use pve_shared_types::{
    AddrExtras, AddrFilter, AddrKey, AddrMessage, AddrOp, AddressFamily, AfSpec, KernelEvent, IFA_F_SECONDARY,
    FieldValue, LinkInfo, LinkMessage, LinkOp, LinkRequest, MacAddr, MessageKind, VlanInfo,
    VlanOp,
};

impl From<SharedTypeError> for NetworkError {
    fn from(err: SharedTypeError) -> Self {
        match err {
            SharedTypeError::InvalidValue { field, value } => {
                NetworkError::Configuration(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value,
                })
            }
            SharedTypeError::ParseError(message) => {
                NetworkError::Configuration(ConfigError::InvalidValue {
                    field: "value".to_string(),
                    value: message,
                })
            }
            SharedTypeError::Unsupported(value) => {
                NetworkError::Configuration(ConfigError::InvalidValue {
                    field: "unsupported".to_string(),
                    value,
                })
            }
        }
    }
}

pub const IFF_UP: i64 = 0x1;
pub const IFF_BROADCAST: i64 = 0x2;
pub const IFF_DEBUG: i64 = 0x4;
pub const IFF_LOOPBACK: i64 = 0x8;
pub const IFF_POINTOPOINT: i64 = 0x10;
pub const IFF_NOTRAILERS: i64 = 0x20;
pub const IFF_RUNNING: i64 = 0x40;
pub const IFF_NOARP: i64 = 0x80;
pub const IFF_PROMISC: i64 = 0x100;
pub const IFF_ALLMULTI: i64 = 0x200;
pub const IFF_MASTER: i64 = 0x400;
pub const IFF_SLAVE: i64 = 0x800;
pub const IFF_MULTICAST: i64 = 0x1000;
pub const IFF_LOWER_UP: i64 = 0x10000;

/// Flags the user may request; the rest are kernel-managed and ignored
/// when deciding whether a flags value converged.
pub const IFF_MASK: i64 = IFF_UP
    | IFF_DEBUG
    | IFF_NOTRAILERS
    | IFF_NOARP
    | IFF_PROMISC
    | IFF_ALLMULTI;

/// Compare two flag words under [`IFF_MASK`]
pub fn flags_match(current: i64, desired: i64) -> bool {
    current & IFF_MASK == desired & IFF_MASK
}
