//! Proxmox VE Network Apply
//!
//! Interface registry fed by kernel notifications, and the transactional
//! commit engine with rollback, resynchronization and frozen interfaces.

pub mod commit;
pub mod freeze;
pub mod hooks;
pub mod registry;
pub mod rollback;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
mod fake_kernel;

pub use hooks::CommitHook;
pub use registry::Ipdb;
pub use transport::{KernelResult, KernelTransport};
pub use watchdog::{Watchdog, WatchdogFilter};

pub use pve_network_core::Result;
