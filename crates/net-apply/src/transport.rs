//! Kernel transport abstraction
//!
//! Encodes requests for the kernel and returns decoded replies. The
//! asynchronous notification stream is delivered separately, see
//! [`crate::Ipdb::spawn_reader`].

use async_trait::async_trait;

use pve_network_core::{
    AddrExtras, AddrFilter, AddrKey, AddrMessage, AddrOp, KernelError, LinkMessage, LinkOp,
    LinkRequest, VlanInfo, VlanOp,
};

/// Result of a kernel round trip
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Request/response side of the kernel link
#[async_trait]
pub trait KernelTransport: Send + Sync {
    /// Create, change or delete a link
    async fn link(&self, op: LinkOp, request: &LinkRequest) -> KernelResult<Vec<LinkMessage>>;

    /// Add or delete an interface address
    async fn addr(
        &self,
        op: AddrOp,
        index: u32,
        address: AddrKey,
        extras: &AddrExtras,
    ) -> KernelResult<Vec<AddrMessage>>;

    /// Add or delete a bridge VLAN filter entry
    async fn vlan_filter(&self, op: VlanOp, index: u32, vlan: VlanInfo) -> KernelResult<()>;

    /// Dump links; an empty slice dumps all of them
    async fn get_links(&self, indices: &[u32]) -> KernelResult<Vec<LinkMessage>>;

    /// Indices of links with the given name
    async fn link_lookup(&self, ifname: &str) -> KernelResult<Vec<u32>>;

    async fn get_addr(&self, filter: AddrFilter) -> KernelResult<Vec<AddrMessage>>;

    /// Dump bridge VLAN information as AF_BRIDGE link messages
    async fn get_vlans(&self) -> KernelResult<Vec<LinkMessage>>;
}
