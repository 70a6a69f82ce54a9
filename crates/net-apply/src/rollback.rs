//! Rollback and resynchronization
//!
//! A failed commit is undone by committing the pre-apply snapshot in
//! rollback mode. When that fails as well, the mirror can no longer be
//! trusted and is rebuilt from a full kernel listing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info};

use pve_network_core::{
    AddrFilter, AddrKey, AddrMessage, Interface, LinkState, MessageKind, Result, Scope,
};

use crate::commit::Failure;
use crate::registry::Ipdb;

impl Ipdb {
    /// Apply `snapshot` as a rollback pass. On failure the targets are
    /// dropped and the registry is resynchronized.
    pub async fn restore(&self, iface: &Arc<Interface>, snapshot: LinkState) -> Result<()> {
        let label = iface.label().await;
        match self.attempt(iface, snapshot, true).await {
            Ok(()) => {
                info!("rolled back {}", label);
                Ok(())
            }
            Err(Failure { error, .. }) => {
                error!("rollback of {} failed: {}", label, error);
                iface.clear_targets().await;
                if let Err(e) = self.resync().await {
                    error!("resync after failed rollback failed: {}", e);
                }
                Err(error)
            }
        }
    }

    /// Rebuild the registry from a full kernel listing: links first, then
    /// port relations, bridge VLANs and addresses. Interfaces the kernel no
    /// longer reports are dropped.
    pub async fn resync(&self) -> Result<()> {
        info!("resynchronizing interfaces with the kernel");
        let links = self.nl.get_links(&[]).await?;
        let present: HashSet<u32> = links.iter().map(|link| link.index).collect();

        for link in &links {
            self.device_put(link, true).await;
        }
        for link in &links {
            self.update_slaves(link, MessageKind::NewLink).await;
        }
        for link in self.nl.get_vlans().await? {
            self.update_dev(&link).await;
        }

        let addrs = self.read_addresses(AddrFilter::All).await?;
        self.sync_addresses(&addrs).await;

        for (index, iface) in self.indexed().await {
            if !present.contains(&index) && iface.scope().await == Scope::System {
                debug!("dropping vanished interface {}", index);
                self.detach_interface(&iface).await;
            }
        }
        Ok(())
    }

    /// Make the address sets match a full address dump
    async fn sync_addresses(&self, addrs: &[AddrMessage]) {
        let mut reported: HashMap<u32, Vec<&AddrMessage>> = HashMap::new();
        for msg in addrs {
            reported.entry(msg.index).or_default().push(msg);
        }

        for (index, iface) in self.indexed().await {
            let messages = reported.remove(&index).unwrap_or_default();
            let keys: HashSet<AddrKey> = messages.iter().map(|msg| msg.key()).collect();
            let result = iface
                .direct(|state| {
                    let stale: Vec<AddrKey> = state
                        .record()
                        .ipaddr
                        .keys()
                        .filter(|key| !keys.contains(*key))
                        .copied()
                        .collect();
                    for key in stale {
                        state.remove_addr(&key);
                    }
                    for msg in &messages {
                        state.add_addr(msg.key(), msg.extras.clone());
                    }
                })
                .await;
            if let Err(e) = result {
                debug!("skipping addresses of {}: {}", index, e);
            }
        }
    }
}
