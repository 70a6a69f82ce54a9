//! Interface registry
//!
//! [`Ipdb`] owns every mirrored [`Interface`], indexed by kernel index and by
//! name, and keeps them in sync with the kernel notification stream.
//! Cross references between interfaces (ports, masters) are plain indices
//! resolved through the registry.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use pve_event_bus::{EventBus, EventBusResult, EventListener};
use pve_network_core::{
    AddrMessage, AddrOp, AddressFamily, CommitMode, ConfigError, DirectState, Interface,
    InterfaceKind, KernelEvent, LinkMessage, MessageKind, PortRef, Result, Scope, SyncSettings,
};

use crate::hooks::CommitHook;
use crate::transport::KernelTransport;
use crate::watchdog::{Watchdog, WatchdogFilter, WatchdogSet};

#[derive(Default)]
struct Tables {
    by_index: HashMap<u32, Arc<Interface>>,
    by_name: HashMap<String, Arc<Interface>>,
}

/// Interface registry and commit engine
pub struct Ipdb {
    pub(crate) nl: Arc<dyn KernelTransport>,
    pub(crate) settings: SyncSettings,
    mode: CommitMode,
    tables: RwLock<Tables>,
    bus: EventBus,
    hooks: RwLock<Vec<(String, Arc<dyn CommitHook>)>>,
    watchdogs: WatchdogSet,
}

impl Ipdb {
    pub fn new(nl: Arc<dyn KernelTransport>, settings: SyncSettings) -> Self {
        Self {
            nl,
            settings,
            mode: CommitMode::default(),
            tables: RwLock::new(Tables::default()),
            bus: EventBus::new(),
            hooks: RwLock::new(Vec::new()),
            watchdogs: WatchdogSet::default(),
        }
    }

    /// Commit mode of interfaces created from now on
    pub fn with_mode(mut self, mode: CommitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn interface(&self, ifname: &str) -> Option<Arc<Interface>> {
        self.tables.read().await.by_name.get(ifname).cloned()
    }

    pub async fn by_index(&self, index: u32) -> Option<Arc<Interface>> {
        self.tables.read().await.by_index.get(&index).cloned()
    }

    /// Every registered interface, including declared ones without an index
    pub async fn interfaces(&self) -> Vec<Arc<Interface>> {
        let tables = self.tables.read().await;
        let mut all: Vec<Arc<Interface>> = tables.by_index.values().cloned().collect();
        for iface in tables.by_name.values() {
            if !all.iter().any(|known| Arc::ptr_eq(known, iface)) {
                all.push(Arc::clone(iface));
            }
        }
        all
    }

    pub(crate) async fn indexed(&self) -> Vec<(u32, Arc<Interface>)> {
        self.tables
            .read()
            .await
            .by_index
            .iter()
            .map(|(index, iface)| (*index, Arc::clone(iface)))
            .collect()
    }

    /// Index of a port reference, if the port is known and exists
    pub async fn resolve_port(&self, port: &PortRef) -> Option<u32> {
        match port {
            PortRef::Index(index) => Some(*index),
            PortRef::Name(name) => {
                let iface = self.interface(name).await?;
                let index = iface.index().await;
                (index != 0).then_some(index)
            }
        }
    }

    /// Declare an interface to be created by its next commit.
    ///
    /// A shadowed interface of the same name is reused.
    pub async fn create(&self, ifname: &str, kind: impl Into<InterfaceKind>) -> Result<Arc<Interface>> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.by_name.get(ifname).cloned() {
            if existing.scope().await == Scope::Shadow {
                existing.direct(|state| state.set_scope(Scope::Create)).await?;
                debug!("reusing shadow interface {}", ifname);
                return Ok(existing);
            }
            return Err(ConfigError::InvalidValue {
                field: "ifname".to_string(),
                value: format!("{} already exists", ifname),
            }
            .into());
        }

        let iface = Arc::new(Interface::new(ifname, kind.into(), self.mode));
        tables.by_name.insert(ifname.to_string(), Arc::clone(&iface));
        info!("declared interface {}", ifname);
        Ok(iface)
    }

    /// Register a one-shot waiter for a notification
    pub async fn watchdog(&self, filter: WatchdogFilter) -> Watchdog {
        self.watchdogs.register(filter).await
    }

    /// Re-key `iface` after its index or name changed
    pub(crate) async fn reindex(&self, iface: &Arc<Interface>) {
        let index = iface.index().await;
        let name = iface.ifname().await;
        let mut tables = self.tables.write().await;
        tables
            .by_index
            .retain(|key, entry| !Arc::ptr_eq(entry, iface) || *key == index);
        tables
            .by_name
            .retain(|key, entry| !Arc::ptr_eq(entry, iface) || Some(key.as_str()) == name.as_deref());
        if index != 0 {
            tables.by_index.insert(index, Arc::clone(iface));
        }
        if let Some(name) = name {
            tables.by_name.insert(name, Arc::clone(iface));
        }
    }

    /// Load a link message into the matching interface, creating the entry
    /// on first sight
    pub async fn device_put(&self, msg: &LinkMessage, skip_slaves: bool) -> Option<Arc<Interface>> {
        if msg.index == 0 {
            return None;
        }

        let existing = {
            let tables = self.tables.read().await;
            tables
                .by_index
                .get(&msg.index)
                .or_else(|| msg.ifname().and_then(|name| tables.by_name.get(name)))
                .cloned()
        };
        let iface = match existing {
            Some(iface) => {
                iface.load_netlink(msg).await;
                iface
            }
            None => {
                debug!(
                    "new interface {} ({})",
                    msg.ifname().unwrap_or_default(),
                    msg.index
                );
                Arc::new(Interface::from_message(msg, self.mode))
            }
        };
        self.reindex(&iface).await;

        if !skip_slaves {
            self.update_slaves(msg, MessageKind::NewLink).await;
        }
        Some(iface)
    }

    /// Keep the port lists of masters in line with a port's link message
    pub async fn update_slaves(&self, msg: &LinkMessage, kind: MessageKind) {
        let index = msg.index;
        // AF_BRIDGE messages of a bridge name the bridge itself as master
        let master_index = msg.master().filter(|master| *master != index);

        match master_index {
            Some(master_index) => {
                let master = self.by_index(master_index).await;
                match kind {
                    MessageKind::NewLink => {
                        // a port moved between masters only gets a NEWLINK
                        for (other_index, other) in self.indexed().await {
                            if other_index != master_index && other.ports().await.contains(&index) {
                                direct_or_log(&other, |state| state.remove_port(index)).await;
                            }
                        }
                        if let Some(master) = master {
                            direct_or_log(&master, |state| state.add_port(index)).await;
                        }
                    }
                    MessageKind::DelLink => {
                        if let Some(master) = master {
                            if master.ports().await.contains(&index) {
                                direct_or_log(&master, |state| state.remove_port(index)).await;
                            }
                        }
                    }
                    _ => {}
                }
            }
            None => {
                for (_, other) in self.indexed().await {
                    if other.ports().await.contains(&index) {
                        direct_or_log(&other, |state| state.remove_port(index)).await;
                    }
                }
                if let Some(device) = self.by_index(index).await {
                    if device.master().await.is_some() {
                        direct_or_log(&device, |state| state.unset("master")).await;
                    }
                }
            }
        }
    }

    /// Apply address messages to the interfaces they belong to
    pub async fn update_addr(&self, msgs: &[AddrMessage], op: AddrOp) {
        for msg in msgs {
            let Some(iface) = self.by_index(msg.index).await else {
                continue;
            };
            let key = msg.key();
            let extras = msg.extras.clone();
            direct_or_log(&iface, |state| match op {
                AddrOp::Add => state.add_addr(key, extras),
                AddrOp::Delete => state.remove_addr(&key),
            })
            .await;
        }
    }

    /// Load a message into an already known interface
    pub async fn update_dev(&self, msg: &LinkMessage) {
        if let Some(iface) = self.by_index(msg.index).await {
            iface.load_netlink(msg).await;
        }
    }

    /// Forget the interface known under `index` or `name`
    pub async fn detach(&self, index: u32, name: Option<&str>) -> Option<Arc<Interface>> {
        let target = {
            let tables = self.tables.read().await;
            tables
                .by_index
                .get(&index)
                .or_else(|| name.and_then(|name| tables.by_name.get(name)))
                .cloned()
        }?;
        self.detach_interface(&target).await;
        Some(target)
    }

    pub(crate) async fn detach_interface(&self, iface: &Arc<Interface>) {
        let mut tables = self.tables.write().await;
        tables.by_index.retain(|_, entry| !Arc::ptr_eq(entry, iface));
        tables.by_name.retain(|_, entry| !Arc::ptr_eq(entry, iface));
    }

    /// Apply one kernel notification, then fire watchdogs and listeners
    pub async fn handle_event(&self, event: &KernelEvent) {
        match event {
            KernelEvent::NewLink(msg) => {
                self.device_put(msg, false).await;
            }
            KernelEvent::DelLink(msg) if msg.family == AddressFamily::Bridge => {
                self.update_dev(msg).await;
            }
            KernelEvent::DelLink(msg) => {
                self.update_slaves(msg, MessageKind::DelLink).await;
                if let Some(iface) = self.by_index(msg.index).await {
                    match iface.scope().await {
                        Scope::Locked | Scope::Shadow => {
                            debug!("keeping {} after removal", iface.label().await)
                        }
                        _ => {
                            debug!("interface {} removed", iface.label().await);
                            self.detach_interface(&iface).await;
                        }
                    }
                }
            }
            KernelEvent::NewAddr(msg) => {
                self.update_addr(std::slice::from_ref(msg), AddrOp::Add).await;
            }
            KernelEvent::DelAddr(msg) => {
                self.update_addr(std::slice::from_ref(msg), AddrOp::Delete).await;
            }
        }

        self.watchdogs.feed(event).await;
        if let Err(e) = self.bus.publish(event).await {
            warn!("listeners failed on {}: {}", event.kind(), e);
        }
    }

    /// Consume the kernel notification stream until it closes
    pub fn spawn_reader(self: Arc<Self>, mut events: mpsc::Receiver<KernelEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(&event).await;
            }
            debug!("kernel notification stream closed");
        })
    }

    /// Register a listener for every handled notification; returns its name
    pub async fn register_callback(&self, listener: Arc<dyn EventListener>) -> EventBusResult<String> {
        let name = Uuid::new_v4().to_string();
        self.bus.register_shared(name.clone(), listener).await?;
        Ok(name)
    }

    pub async fn unregister_callback(&self, name: &str) -> EventBusResult<()> {
        self.bus.unregister_listener(name).await
    }

    /// Register a hook run by every commit; returns its name
    pub async fn register_commit_hook(&self, hook: Arc<dyn CommitHook>) -> String {
        let name = Uuid::new_v4().to_string();
        self.hooks.write().await.push((name.clone(), hook));
        name
    }

    pub async fn unregister_commit_hook(&self, name: &str) -> bool {
        let mut hooks = self.hooks.write().await;
        let before = hooks.len();
        hooks.retain(|(hook_name, _)| hook_name != name);
        hooks.len() != before
    }

    pub(crate) async fn commit_hooks(&self) -> Vec<(String, Arc<dyn CommitHook>)> {
        self.hooks.read().await.clone()
    }
}

async fn direct_or_log(iface: &Interface, f: impl FnOnce(&mut DirectState<'_>)) {
    if let Err(e) = iface.direct(f).await {
        debug!("skipping update: {}", e);
    }
}
