//! Frozen interfaces
//!
//! Freezing pins an interface to its current state: any later notification
//! about it starts a rollback-mode commit back to that state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, warn};

use pve_event_bus::{EventBusResult, EventListener};
use pve_network_core::{Interface, KernelEvent, LinkState};

use crate::registry::Ipdb;

struct FreezeListener {
    ipdb: Weak<Ipdb>,
    iface: Arc<Interface>,
    index: u32,
    frozen: LinkState,
    /// A restore task is running
    busy: Arc<AtomicBool>,
    /// Notifications arrived while it was running
    pending: Arc<AtomicBool>,
}

#[async_trait]
impl EventListener for FreezeListener {
    async fn on_event(&self, event: &KernelEvent) -> anyhow::Result<()> {
        if event.index() != self.index {
            return Ok(());
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            self.pending.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let Some(ipdb) = self.ipdb.upgrade() else {
            self.busy.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let iface = Arc::clone(&self.iface);
        let frozen = self.frozen.clone();
        let busy = Arc::clone(&self.busy);
        let pending = Arc::clone(&self.pending);
        // the reader task delivers the notifications the restore waits for
        tokio::spawn(async move {
            loop {
                pending.store(false, Ordering::SeqCst);
                if let Err(e) = ipdb.restore(&iface, frozen.clone()).await {
                    warn!("restoring frozen {} failed: {}", iface.label().await, e);
                }
                busy.store(false, Ordering::SeqCst);
                if !pending.load(Ordering::SeqCst) || busy.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
        Ok(())
    }
}

impl Ipdb {
    /// Freeze `iface` in its current state; returns the name to unfreeze it
    pub async fn freeze(self: &Arc<Self>, iface: &Arc<Interface>) -> EventBusResult<String> {
        let frozen = iface.pick().await;
        let listener = FreezeListener {
            ipdb: Arc::downgrade(self),
            iface: Arc::clone(iface),
            index: frozen.index(),
            frozen,
            busy: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicBool::new(false)),
        };
        let name = self.register_callback(Arc::new(listener)).await?;
        debug!("froze {} as {}", iface.label().await, name);
        Ok(name)
    }

    pub async fn unfreeze(&self, name: &str) -> EventBusResult<()> {
        self.unregister_callback(name).await
    }
}
