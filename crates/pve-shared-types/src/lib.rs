pub mod addr;
pub mod error;
pub mod events;
pub mod link;
pub mod network;
pub mod value;

pub use addr::{AddrExtras, AddrFilter, AddrMessage, AddrOp, IFA_F_SECONDARY};
pub use error::{SharedResult, SharedTypeError};
pub use events::{KernelEvent, MessageKind};
pub use link::{AddressFamily, AfSpec, LinkInfo, LinkMessage, LinkOp, LinkRequest, VlanInfo, VlanOp};
pub use network::{AddrKey, MacAddr};
pub use value::FieldValue;
