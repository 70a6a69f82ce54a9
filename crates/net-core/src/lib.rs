//! Proxmox VE Network Core
//!
//! Transactional in-memory mirror of kernel network interfaces: convergence
//! targets, tracked collections, transactional records and the interface
//! entity built from them.

pub mod error;
pub mod fields;
pub mod interface;
pub mod kind;
pub mod linked_set;
pub mod settings;
pub mod state;
pub mod target;
pub mod transactional;
pub mod types;

pub use error::{errno, ConfigError, KernelError, NetworkError, UsageError};
pub use fields::{FieldClass, ValueKind};
pub use interface::{DirectState, Interface, PortRef};
pub use kind::InterfaceKind;
pub use settings::SyncSettings;
pub use state::{InterfaceDump, LinkState, Patch, Scope};
pub use target::TargetWaiter;
pub use transactional::{CommitMode, TransactionId};
pub use types::*;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;
