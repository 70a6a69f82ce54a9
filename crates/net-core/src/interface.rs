//! Interface entity
//!
//! An [`Interface`] mirrors one kernel network interface. User edits go to
//! transactions, kernel notifications go straight into the snapshot through
//! [`DirectState`], which also signals field and collection targets.
//!
//! The state lock is never held across kernel I/O; commits serialize on the
//! separate write lock.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::error::{ConfigError, NetworkError, UsageError};
use crate::fields::{registry, values_match, FieldClass};
use crate::kind::InterfaceKind;
use crate::linked_set::IpAddrSet;
use crate::state::{AddrDump, Delta, InterfaceDump, LinkState, Scope};
use crate::target::{ConvergenceTarget, TargetWaiter};
use crate::transactional::{CommitMode, Transactional, TransactionId};
use crate::types::{
    AddrExtras, AddrKey, AddressFamily, FieldValue, LinkMessage, LinkRequest, VlanInfo, IFF_UP,
};
use crate::Result;

/// A bridge or bond port, by index or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Index(u32),
    /// Resolved at commit time
    Name(String),
}

impl From<u32> for PortRef {
    fn from(index: u32) -> Self {
        PortRef::Index(index)
    }
}

impl From<&str> for PortRef {
    fn from(name: &str) -> Self {
        PortRef::Name(name.to_string())
    }
}

impl From<String> for PortRef {
    fn from(name: String) -> Self {
        PortRef::Name(name)
    }
}

#[derive(Debug)]
struct FieldTarget {
    /// Fields whose updates may satisfy the goal
    watched: Vec<&'static str>,
    target: ConvergenceTarget<Option<FieldValue>>,
}

/// Per-field convergence targets, keyed by the primary field
#[derive(Debug, Default)]
struct FieldTargets {
    targets: BTreeMap<&'static str, FieldTarget>,
}

impl FieldTargets {
    fn set(&mut self, name: &'static str, goal: Option<FieldValue>, current: &LinkState) -> TargetWaiter {
        let reached = values_match(name, current.get(name), goal.as_ref());
        let entry = self.targets.entry(name).or_insert_with(|| FieldTarget {
            watched: Vec::new(),
            target: ConvergenceTarget::new(),
        });
        entry.watched = vec![name];
        entry.target.set(goal, reached)
    }

    fn mirror(&mut self, from: &'static str, to: &'static str, current: &LinkState) -> bool {
        let Some(entry) = self.targets.get_mut(from) else {
            return false;
        };
        if !entry.watched.contains(&to) {
            entry.watched.push(to);
        }
        let value = current.get(to);
        entry
            .target
            .check(|goal| values_match(from, value, goal.as_ref()));
        true
    }

    fn check(&self, name: &str, value: Option<&FieldValue>) {
        for (primary, entry) in &self.targets {
            if entry.watched.iter().any(|watched| *watched == name) {
                entry
                    .target
                    .check(|goal| values_match(primary, value, goal.as_ref()));
            }
        }
    }

    fn waiter(&self, name: &str) -> Option<TargetWaiter> {
        self.targets.get(name).map(|entry| entry.target.waiter())
    }

    fn waiters(&self) -> Vec<(&'static str, TargetWaiter)> {
        self.targets
            .iter()
            .map(|(name, entry)| (*name, entry.target.waiter()))
            .collect()
    }

    fn remove(&mut self, name: &str) {
        self.targets.remove(name);
    }

    fn clear(&mut self) {
        self.targets.clear();
    }
}

/// Write access to the snapshot that bypasses open transactions.
///
/// Only notification ingestion and the commit engine use it; every write
/// re-checks the targets the written field or collection may satisfy.
pub struct DirectState<'a> {
    record: &'a mut LinkState,
    targets: &'a FieldTargets,
}

impl DirectState<'_> {
    pub fn record(&self) -> &LinkState {
        &*self.record
    }

    /// Set a registered field; values of unknown fields or of the wrong
    /// type are dropped
    pub fn set(&mut self, name: &str, value: FieldValue) -> bool {
        let spec = match registry().validate(name, &value) {
            Ok(spec) => spec,
            Err(e) => {
                debug!("ignoring attribute: {}", e);
                return false;
            }
        };
        self.record.set_static(spec.name, value);
        self.targets.check(spec.name, self.record.get(spec.name));
        true
    }

    pub fn unset(&mut self, name: &str) {
        self.record.unset(name);
        self.targets.check(name, None);
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.record.scope = scope;
    }

    pub fn add_addr(&mut self, key: AddrKey, extras: AddrExtras) {
        self.record.ipaddr.add(key, extras);
    }

    pub fn remove_addr(&mut self, key: &AddrKey) {
        self.record.ipaddr.remove(key);
    }

    pub fn add_port(&mut self, index: u32) {
        self.record.ports.add(index, ());
    }

    pub fn remove_port(&mut self, index: u32) {
        self.record.ports.remove(&index);
    }

    pub fn add_vlan(&mut self, vlan: VlanInfo) {
        self.record.vlans.add(vlan.vid, vlan);
    }

    pub fn remove_vlan(&mut self, vid: u16) {
        self.record.vlans.remove(&vid);
    }

    /// Replace every field and collection with the content of `state`.
    ///
    /// Collection members are replaced one by one, so pending targets
    /// keep working.
    pub fn replace(&mut self, state: &LinkState) {
        let stale: Vec<&'static str> = self
            .record
            .fields()
            .map(|(name, _)| name)
            .filter(|name| state.get(name).is_none())
            .collect();
        for name in stale {
            self.unset(name);
        }
        for (name, value) in state.fields() {
            self.set(name, value.clone());
        }
        self.record.scope = state.scope;

        for key in self.record.ipaddr.difference(&state.ipaddr) {
            self.remove_addr(&key);
        }
        for (key, extras) in state.ipaddr.iter() {
            self.add_addr(*key, extras.clone());
        }
        for index in self.record.ports.difference(&state.ports) {
            self.remove_port(index);
        }
        for index in state.ports.keys() {
            self.add_port(*index);
        }
        for vid in self.record.vlans.difference(&state.vlans) {
            self.remove_vlan(vid);
        }
        for (_, vlan) in state.vlans.iter() {
            self.add_vlan(*vlan);
        }
        self.record.delay_add_port = state.delay_add_port.clone();
        self.record.delay_del_port = state.delay_del_port.clone();
    }

    /// Apply a link notification. Returns false when it was ignored.
    pub fn ingest(&mut self, msg: &LinkMessage) -> bool {
        match self.record.scope {
            Scope::Locked | Scope::Invalid => return false,
            Scope::Shadow | Scope::Create if !msg.is_broadcast() => return false,
            _ => {}
        }

        self.set_scope(Scope::System);
        self.set("index", FieldValue::from(msg.index));
        self.set("flags", FieldValue::Int(i64::from(msg.flags)));
        for (name, value) in &msg.attrs {
            if matches!(name.as_str(), "master" | "link") && value.as_int() == Some(0) {
                self.unset("master");
            } else {
                self.set(name, value.clone());
            }
        }

        if let Some(info) = &msg.link_info {
            self.set("kind", FieldValue::Text(info.kind.clone()));
            let kind = InterfaceKind::from(info.kind.as_str());
            if kind == InterfaceKind::Vlan {
                if let Some(vid) = info.get_attr("vlan_id") {
                    self.set("vlan_id", vid.clone());
                }
            }
            if kind.flattens_link_info() {
                for (name, value) in &info.data {
                    self.set(name, value.clone());
                }
            }
        }

        if msg.family == AddressFamily::Bridge {
            if let Some(spec) = &msg.af_spec {
                let reported: BTreeMap<u16, VlanInfo> =
                    spec.vlans.iter().map(|vlan| (vlan.vid, *vlan)).collect();
                let stale: Vec<u16> = self
                    .record
                    .vlans
                    .keys()
                    .filter(|vid| !reported.contains_key(*vid))
                    .copied()
                    .collect();
                for vid in stale {
                    self.remove_vlan(vid);
                }
                for vlan in reported.values() {
                    if !self.record.vlans.contains(&vlan.vid) {
                        self.add_vlan(*vlan);
                    }
                }
            }
        }

        // AF_BRIDGE messages of a bridge report the bridge as its own master
        if msg.index != 0 && self.record.master() == Some(msg.index) {
            self.unset("master");
        }
        true
    }
}

#[derive(Debug)]
struct InterfaceState {
    record: Transactional<LinkState>,
    targets: FieldTargets,
    /// Name used in errors once the record is invalidated
    label: String,
}

impl InterfaceState {
    fn new(snapshot: LinkState, mode: CommitMode) -> Self {
        let label = snapshot.ifname().unwrap_or_default().to_string();
        Self {
            record: Transactional::new(snapshot, mode),
            targets: FieldTargets::default(),
            label,
        }
    }

    fn direct(&mut self) -> DirectState<'_> {
        DirectState {
            record: self.record.snapshot_mut(),
            targets: &self.targets,
        }
    }

    fn snapshot(&self) -> &LinkState {
        self.record.snapshot()
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.record.is_invalid() {
            return Err(UsageError::Invalidated {
                name: self.label.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn last(&mut self) -> Result<&mut LinkState> {
        self.ensure_valid()?;
        Ok(self.record.last()?)
    }

    fn apply_message(&mut self, msg: &LinkMessage) -> bool {
        let applied = self.direct().ingest(msg);
        if applied {
            if let Some(name) = self.snapshot().ifname() {
                self.label = name.to_string();
            }
        }
        applied
    }
}

/// In-memory mirror of one kernel network interface
#[derive(Debug)]
pub struct Interface {
    state: Mutex<InterfaceState>,
    write_lock: Mutex<()>,
    loaded: watch::Sender<u64>,
}

impl Interface {
    /// Declare a new interface, to be created by the next commit
    pub fn new(ifname: &str, kind: InterfaceKind, mode: CommitMode) -> Self {
        let mut snapshot = LinkState::new(Scope::Create);
        snapshot.set_static("ifname", FieldValue::from(ifname));
        snapshot.set_static("kind", FieldValue::Text(kind.to_string()));
        snapshot.set_static("ipdb_priority", FieldValue::Int(0));
        Self::with_state(InterfaceState::new(snapshot, mode), 0)
    }

    /// Mirror an existing interface from its link message
    pub fn from_message(msg: &LinkMessage, mode: CommitMode) -> Self {
        let mut snapshot = LinkState::new(Scope::System);
        snapshot.set_static("ipdb_priority", FieldValue::Int(0));
        let mut state = InterfaceState::new(snapshot, mode);
        state.apply_message(msg);
        Self::with_state(state, 1)
    }

    fn with_state(state: InterfaceState, loads: u64) -> Self {
        let (loaded, _) = watch::channel(loads);
        Self {
            state: Mutex::new(state),
            write_lock: Mutex::new(()),
            loaded,
        }
    }

    /// Serializes commits on this interface
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn index(&self) -> u32 {
        self.state.lock().await.snapshot().index()
    }

    pub async fn ifname(&self) -> Option<String> {
        self.state.lock().await.snapshot().ifname().map(str::to_string)
    }

    /// Name, or the last known one once invalidated
    pub async fn label(&self) -> String {
        self.state.lock().await.label.clone()
    }

    pub async fn kind(&self) -> Option<InterfaceKind> {
        self.state.lock().await.snapshot().kind()
    }

    pub async fn scope(&self) -> Scope {
        self.state.lock().await.snapshot().scope
    }

    pub async fn master(&self) -> Option<u32> {
        self.state.lock().await.snapshot().master()
    }

    pub async fn mode(&self) -> CommitMode {
        self.state.lock().await.record.mode()
    }

    pub async fn is_invalid(&self) -> bool {
        self.state.lock().await.record.is_invalid()
    }

    pub async fn get(&self, name: &str) -> Option<FieldValue> {
        self.state.lock().await.snapshot().get(name).cloned()
    }

    pub async fn ipaddr(&self) -> BTreeSet<AddrKey> {
        self.state.lock().await.snapshot().ipaddr.key_set()
    }

    pub async fn ports(&self) -> BTreeSet<u32> {
        self.state.lock().await.snapshot().ports.key_set()
    }

    pub async fn vlans(&self) -> BTreeSet<u16> {
        self.state.lock().await.snapshot().vlans.key_set()
    }

    pub async fn begin(&self) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        state.ensure_valid()?;
        Ok(state.record.begin())
    }

    /// Open a transaction whose commit collects errors instead of rolling back
    pub async fn begin_partial(&self) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        state.ensure_valid()?;
        let id = state.record.begin();
        state.record.transaction_mut(&id)?.partial = true;
        Ok(id)
    }

    pub async fn last_transaction(&self) -> Option<TransactionId> {
        self.state.lock().await.record.last_id()
    }

    /// Copy of an open transaction
    pub async fn transaction(&self, id: &TransactionId) -> Result<LinkState> {
        let state = self.state.lock().await;
        state.ensure_valid()?;
        Ok(state.record.transaction(id)?.clone())
    }

    pub async fn drop_transaction(&self, id: &TransactionId) -> bool {
        self.state.lock().await.record.drop_transaction(id).is_some()
    }

    /// Pending changes of transaction `id`, with `+`/`-` collection markers
    pub async fn review(&self, id: &TransactionId) -> Result<Map<String, Value>> {
        let state = self.state.lock().await;
        state.ensure_valid()?;
        let mut patch = state.record.review(id)?;
        if state.snapshot().scope == Scope::Create {
            let transaction = state.record.transaction(id)?;
            patch.ipaddr = Delta {
                added: transaction.ipaddr.key_set(),
                removed: BTreeSet::new(),
            };
            patch.ports = Delta {
                added: transaction.ports.key_set(),
                removed: BTreeSet::new(),
            };
            patch.vlans = Delta {
                added: transaction.vlans.key_set(),
                removed: BTreeSet::new(),
            };
        }
        Ok(patch.render())
    }

    async fn with_last<T>(&self, f: impl FnOnce(&mut LinkState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let last = state.last()?;
        f(last)
    }

    pub async fn set(&self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        self.with_last(|last| Ok(last.set(name, value)?)).await
    }

    pub async fn unset(&self, name: &str) -> Result<()> {
        self.with_last(|last| {
            last.unset(name);
            Ok(())
        })
        .await
    }

    /// Add an address given as `addr/len` or `addr/dotted.mask`
    pub async fn add_ip(&self, spec: &str) -> Result<()> {
        let key = AddrKey::from_str(spec)?;
        self.add_ip_with(key, AddrExtras::default()).await
    }

    pub async fn add_ip_with(&self, key: AddrKey, extras: AddrExtras) -> Result<()> {
        if key.is_ipv6_link_local() {
            return Ok(());
        }
        self.with_last(|last| {
            last.ipaddr.unlink(&key);
            last.ipaddr.add(key, extras);
            Ok(())
        })
        .await
    }

    pub async fn del_ip(&self, spec: &str) -> Result<()> {
        let key = AddrKey::from_str(spec)?;
        self.with_last(|last| {
            if last.ipaddr.contains(&key) {
                last.ipaddr.unlink(&key);
                last.ipaddr.remove(&key);
            }
            Ok(())
        })
        .await
    }

    pub async fn add_vlan(&self, vlan: impl Into<VlanInfo>) -> Result<()> {
        let vlan = vlan.into();
        self.with_last(|last| {
            last.vlans.unlink(&vlan.vid);
            last.vlans.add(vlan.vid, vlan);
            Ok(())
        })
        .await
    }

    pub async fn del_vlan(&self, vid: u16) -> Result<()> {
        self.with_last(|last| {
            if last.vlans.contains(&vid) {
                last.vlans.unlink(&vid);
                last.vlans.remove(&vid);
            }
            Ok(())
        })
        .await
    }

    /// Attach a port. Names are kept aside until the commit resolves them.
    pub async fn add_port(&self, port: impl Into<PortRef>) -> Result<()> {
        let port = port.into();
        self.with_last(|last| {
            match port {
                PortRef::Index(index) => {
                    last.ports.unlink(&index);
                    last.ports.add(index, ());
                }
                PortRef::Name(name) => {
                    last.delay_add_port.insert(name);
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn del_port(&self, port: impl Into<PortRef>) -> Result<()> {
        let port = port.into();
        self.with_last(|last| {
            match port {
                PortRef::Index(index) => {
                    last.ports.unlink(&index);
                    last.ports.remove(&index);
                }
                PortRef::Name(name) => {
                    last.delay_del_port.insert(name);
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn up(&self) -> Result<()> {
        self.with_last(|last| {
            let flags = last.flags().map(|flags| flags | IFF_UP).unwrap_or(IFF_UP);
            last.set_static("flags", FieldValue::Int(flags));
            Ok(())
        })
        .await
    }

    pub async fn down(&self) -> Result<()> {
        self.with_last(|last| {
            let flags = last.flags().map(|flags| flags & !IFF_UP).unwrap_or(0);
            last.set_static("flags", FieldValue::Int(flags));
            Ok(())
        })
        .await
    }

    /// Mark the interface for removal by the next commit
    pub async fn remove(&self) -> Result<()> {
        self.with_last(|last| {
            last.scope = Scope::Remove;
            Ok(())
        })
        .await
    }

    /// Remove the interface from the kernel but keep it in the mirror
    pub async fn shadow(&self) -> Result<()> {
        self.with_last(|last| {
            last.scope = Scope::Shadow;
            Ok(())
        })
        .await
    }

    /// Write `value` into every open transaction, `None` unsets the field.
    /// Used when a commit of another interface changed this one.
    pub async fn propagate(&self, name: &str, value: Option<FieldValue>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_valid()?;
        for transaction in state.record.transactions_mut() {
            match &value {
                Some(value) => transaction.set(name, value.clone())?,
                None => {
                    transaction.unset(name);
                }
            }
        }
        Ok(())
    }

    /// Load a mapping into the current transaction
    pub async fn load(&self, data: &Map<String, Value>) -> Result<()> {
        self.with_last(|last| apply_mapping(last, data)).await
    }

    /// Load a mapping straight into the snapshot, bypassing transactions
    pub async fn load_dict(&self, data: &Map<String, Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_valid()?;
        let mut desired = state.snapshot().clone();
        apply_mapping(&mut desired, data)?;
        state.direct().replace(&desired);
        Ok(())
    }

    /// Build a detached transaction from a mapping, for `commit_transaction`
    pub async fn make_transaction(&self, data: &Map<String, Value>) -> Result<LinkState> {
        let _guard = self.write_lock.lock().await;
        let state = self.state.lock().await;
        state.ensure_valid()?;
        let mut template = LinkState::new(state.snapshot().scope);
        apply_mapping(&mut template, data)?;
        Ok(template)
    }

    /// Apply a link notification to the snapshot and raise the load signal
    pub async fn load_netlink(&self, msg: &LinkMessage) -> bool {
        let applied = self.state.lock().await.apply_message(msg);
        if applied {
            self.loaded.send_modify(|loads| *loads += 1);
        }
        applied
    }

    /// Wait for a notification loaded after this call
    pub async fn wait_loaded(&self, timeout: Duration) -> bool {
        let mut loaded = self.loaded.subscribe();
        loaded.borrow_and_update();
        matches!(tokio::time::timeout(timeout, loaded.changed()).await, Ok(Ok(())))
    }

    pub async fn filter(&self, class: FieldClass) -> LinkRequest {
        self.state.lock().await.snapshot().filter(class)
    }

    pub async fn dump(&self) -> InterfaceDump {
        self.state.lock().await.snapshot().dump()
    }

    /// Copy of the snapshot
    pub async fn pick(&self) -> LinkState {
        self.state.lock().await.snapshot().clone()
    }

    /// Run `f` on the direct state
    pub async fn direct<T>(&self, f: impl FnOnce(&mut DirectState<'_>) -> T) -> Result<T> {
        let mut state = self.state.lock().await;
        state.ensure_valid()?;
        let mut direct = state.direct();
        Ok(f(&mut direct))
    }

    pub async fn set_field_target(&self, name: &str, goal: Option<FieldValue>) -> Result<TargetWaiter> {
        let spec = registry().spec(name)?;
        let mut state = self.state.lock().await;
        let InterfaceState {
            record, targets, ..
        } = &mut *state;
        Ok(targets.set(spec.name, goal, record.snapshot()))
    }

    /// Let updates of `to` satisfy the target installed on `from`
    pub async fn mirror_target(&self, from: &str, to: &str) -> Result<()> {
        let from = registry().spec(from)?.name;
        let to = registry().spec(to)?.name;
        let mut state = self.state.lock().await;
        let InterfaceState {
            record, targets, ..
        } = &mut *state;
        if !targets.mirror(from, to, record.snapshot()) {
            return Err(ConfigError::InvalidValue {
                field: from.to_string(),
                value: "no target to mirror".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn field_target(&self, name: &str) -> Option<TargetWaiter> {
        self.state.lock().await.targets.waiter(name)
    }

    pub async fn field_targets(&self) -> Vec<(&'static str, TargetWaiter)> {
        self.state.lock().await.targets.waiters()
    }

    pub async fn clear_field_target(&self, name: &str) {
        self.state.lock().await.targets.remove(name);
    }

    pub async fn set_ipaddr_target(&self, goal: BTreeSet<AddrKey>) -> TargetWaiter {
        self.state.lock().await.record.snapshot_mut().ipaddr.set_target(goal)
    }

    pub async fn set_ports_target(&self, goal: BTreeSet<u32>) -> TargetWaiter {
        self.state.lock().await.record.snapshot_mut().ports.set_target(goal)
    }

    pub async fn set_vlans_target(&self, goal: BTreeSet<u16>) -> TargetWaiter {
        self.state.lock().await.record.snapshot_mut().vlans.set_target(goal)
    }

    /// Drop every collection and field target
    pub async fn clear_targets(&self) {
        let mut state = self.state.lock().await;
        let snapshot = state.record.snapshot_mut();
        snapshot.ipaddr.clear_target();
        snapshot.ports.clear_target();
        snapshot.vlans.clear_target();
        state.targets.clear();
    }

    /// Kill the record: fields and transactions are dropped, every later
    /// operation fails with a usage error
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.record.invalidate(LinkState::new(Scope::Invalid));
        state.targets.clear();
    }
}

/// Apply a mapping to a record.
///
/// Accepts flat mappings (`{"mtu": 1400, "ipaddr": [...]}`) as well as the
/// output of [`Interface::dump`].
fn apply_mapping(target: &mut LinkState, data: &Map<String, Value>) -> Result<()> {
    for (key, value) in data {
        match key.as_str() {
            "fields" => {
                let fields = value.as_object().ok_or_else(|| invalid(key, value))?;
                apply_mapping(target, fields)?;
            }
            "ipdb_scope" | "scope" => {
                target.scope = serde_json::from_value(value.clone())?;
            }
            "ipaddr" => {
                let items = value.as_array().ok_or_else(|| invalid(key, value))?;
                let mut addresses = IpAddrSet::new();
                for item in items {
                    let (address, extras) = match item {
                        Value::String(spec) => (AddrKey::from_str(spec)?, AddrExtras::default()),
                        _ => {
                            let dump: AddrDump = serde_json::from_value(item.clone())?;
                            (dump.address, dump.extras)
                        }
                    };
                    if !address.is_ipv6_link_local() {
                        addresses.add(address, extras);
                    }
                }
                replace_members(&mut target.ipaddr, addresses.iter().map(|(k, v)| (*k, v.clone())));
            }
            "ports" => {
                let items = value.as_array().ok_or_else(|| invalid(key, value))?;
                let mut ports = Vec::new();
                for item in items {
                    match item {
                        Value::Number(_) => {
                            let index: u32 = serde_json::from_value(item.clone())?;
                            ports.push((index, ()));
                        }
                        Value::String(name) => {
                            target.delay_add_port.insert(name.clone());
                        }
                        _ => return Err(invalid(key, item)),
                    }
                }
                replace_members(&mut target.ports, ports);
            }
            "vlans" => {
                let items = value.as_array().ok_or_else(|| invalid(key, value))?;
                let mut vlans = Vec::new();
                for item in items {
                    let vlan = match item {
                        Value::Number(_) => VlanInfo::new(serde_json::from_value(item.clone())?),
                        _ => serde_json::from_value(item.clone())?,
                    };
                    vlans.push((vlan.vid, vlan));
                }
                replace_members(&mut target.vlans, vlans);
            }
            "neighbours" => {}
            name => {
                let (spec, converted) = registry().coerce(name, value)?;
                target.set_static(spec.name, converted);
            }
        }
    }
    Ok(())
}

fn replace_members<K, V>(set: &mut crate::linked_set::LinkedSet<K, V>, members: impl IntoIterator<Item = (K, V)>)
where
    K: Ord + std::hash::Hash + Clone,
    V: Clone,
{
    for key in set.key_set() {
        set.unlink(&key);
        set.remove(&key);
    }
    for (key, payload) in members {
        set.add(key, payload);
    }
}

fn invalid(key: &str, value: &Value) -> NetworkError {
    ConfigError::InvalidValue {
        field: key.to_string(),
        value: value.to_string(),
    }
    .into()
}
