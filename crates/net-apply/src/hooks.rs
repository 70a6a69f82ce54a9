//! Commit hooks

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use pve_network_core::InterfaceDump;

/// Called after addresses are applied and before the commit settles.
///
/// Returning an error aborts the commit exactly like a kernel failure, so
/// the transaction is rolled back.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn on_commit(
        &self,
        current: &InterfaceDump,
        snapshot: &InterfaceDump,
        transaction: &InterfaceDump,
    ) -> anyhow::Result<()>;
}
