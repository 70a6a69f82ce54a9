//! Commit orchestration
//!
//! A commit applies the difference between the pre-apply snapshot and a
//! transaction in a fixed order: creation, VLANs, ports, attributes,
//! addresses, hooks, removal and a final reload. Every step waits until the
//! mirror reflects its change before the next one starts, so a commit that
//! returns `Ok` has been observed through kernel notifications.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use pve_network_core::fields::registry;
use pve_network_core::{
    errno, AddrExtras, AddrFilter, AddrKey, AddrMessage, AddrOp, FieldClass, FieldValue,
    Interface, InterfaceKind, KernelError, LinkOp, LinkRequest, LinkState, MessageKind,
    NetworkError, Patch, PortRef, Result, Scope, TransactionId, UsageError, VlanInfo, VlanOp,
};
use pve_network_core::transactional::Record;

use crate::registry::Ipdb;
use crate::watchdog::{Watchdog, WatchdogFilter};

/// Pause before each re-add of a bond address
const BOND_READD_PAUSE: Duration = Duration::from_millis(100);

/// Fields only meaningful when the link is created
const CREATE_ONLY: &[&str] = &["kind", "peer"];

/// Error of one commit pass, with the snapshot a rollback should restore
pub(crate) struct Failure {
    pub(crate) error: NetworkError,
    /// `None` when nothing was applied yet or the commit was partial
    pub(crate) snapshot: Option<LinkState>,
}

impl Failure {
    fn bare(error: NetworkError) -> Self {
        Self {
            error,
            snapshot: None,
        }
    }
}

/// Step errors of one pass. Partial commits record them and carry on.
struct StepErrors {
    partial: bool,
    errors: Vec<NetworkError>,
}

impl StepErrors {
    fn new(partial: bool) -> Self {
        Self {
            partial,
            errors: Vec::new(),
        }
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.partial => {
                warn!("partial commit: {}", e);
                self.errors.push(e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn kernel<T>(&mut self, result: std::result::Result<T, KernelError>) -> Result<Option<T>> {
        self.check(result.map_err(NetworkError::from))
    }

    fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(NetworkError::PartialCommit(self.errors.into()))
        }
    }
}

/// Outcome of steps 1-3
struct Prepared {
    snapshot: LinkState,
    transaction: LinkState,
    index: u32,
}

impl Ipdb {
    /// Commit the last open transaction of `iface`
    pub async fn commit(&self, iface: &Arc<Interface>) -> Result<()> {
        let id = iface
            .last_transaction()
            .await
            .ok_or(UsageError::NoTransaction)?;
        self.commit_id(iface, &id).await
    }

    /// Commit transaction `id`. The transaction is dropped whatever the
    /// outcome.
    pub async fn commit_id(&self, iface: &Arc<Interface>, id: &TransactionId) -> Result<()> {
        let transaction = iface.transaction(id).await?;
        let result = self.commit_transaction(iface, transaction).await;
        iface.drop_transaction(id).await;
        result
    }

    /// Apply a detached transaction, rolling back to the pre-apply snapshot
    /// when a step fails
    pub async fn commit_transaction(&self, iface: &Arc<Interface>, transaction: LinkState) -> Result<()> {
        let label = iface.label().await;
        match self.attempt(iface, transaction, false).await {
            Ok(()) => {
                info!("committed {}", label);
                Ok(())
            }
            Err(Failure { error, snapshot }) => {
                iface.clear_targets().await;
                let Some(snapshot) = snapshot else {
                    return Err(error);
                };
                warn!("commit of {} failed, rolling back: {}", label, error);
                match self.restore(iface, snapshot).await {
                    Ok(()) => Err(error),
                    Err(rollback) => Err(NetworkError::RollbackFailed {
                        error: Box::new(error),
                        rollback: Box::new(rollback),
                    }),
                }
            }
        }
    }

    /// One pass over all steps
    pub(crate) async fn attempt(
        &self,
        iface: &Arc<Interface>,
        transaction: LinkState,
        rollback: bool,
    ) -> std::result::Result<(), Failure> {
        let partial = transaction.partial && !rollback;
        let mut errors = StepErrors::new(partial);

        let prepared = match self.prepare(iface, transaction, &mut errors).await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return errors.finish().map_err(Failure::bare),
            Err(e) => return Err(Failure::bare(e)),
        };

        let snapshot = prepared.snapshot.clone();
        match self.apply(iface, prepared, rollback, &mut errors).await {
            Ok(()) => errors.finish().map_err(Failure::bare),
            Err(error) => Err(Failure {
                error,
                snapshot: (!partial).then_some(snapshot),
            }),
        }
    }

    /// Steps 1-3: make sure the link exists, take the snapshot and resolve
    /// deferred ports. `None` means a partial commit gave up early.
    async fn prepare(
        &self,
        iface: &Arc<Interface>,
        mut transaction: LinkState,
        errors: &mut StepErrors,
    ) -> Result<Option<Prepared>> {
        if iface.is_invalid().await {
            return Err(UsageError::Invalidated {
                name: iface.label().await,
            }
            .into());
        }

        let guard = iface.lock_writes().await;
        let scope = iface.scope().await;
        let name = transaction
            .ifname()
            .map(str::to_string)
            .unwrap_or(iface.label().await);

        let created = matches!(scope, Scope::Create | Scope::Shadow);
        if created {
            let watchdog = match self.create_link(iface, &name, &transaction).await {
                Ok(watchdog) => watchdog,
                Err(e) => {
                    errors.check::<()>(Err(e))?;
                    return Ok(None);
                }
            };

            if !watchdog.wait(self.settings.sync_timeout()).await {
                debug!("no notification for {} yet", name);
            }
            if iface.index().await == 0 {
                let Some(found) = errors.kernel(self.nl.link_lookup(&name).await)? else {
                    return Ok(None);
                };
                match found.first() {
                    Some(index) => {
                        let index = *index;
                        // adopted without a notification
                        iface
                            .direct(|state| {
                                state.set("index", FieldValue::from(index));
                                state.set_scope(Scope::System);
                            })
                            .await?;
                        self.reindex(iface).await;
                    }
                    None => {
                        errors.check::<()>(Err(NetworkError::Create { name }))?;
                        return Ok(None);
                    }
                }
            }

            // keep what the kernel assigned on its own, the notifications
            // for it may still be queued
            let filter = AddrFilter::Index(iface.index().await);
            let Some(assigned) = errors.check(self.read_addresses(filter).await)? else {
                return Ok(None);
            };
            self.update_addr(&assigned, AddrOp::Add).await;
            for (key, extras) in iface.pick().await.ipaddr.iter() {
                transaction.ipaddr.add(*key, extras.clone());
            }
        }
        drop(guard);

        let mut snapshot = iface.pick().await;
        if scope == Scope::Create {
            // rolling back to this snapshot deletes the link again
            snapshot.scope = Scope::Create;
        }

        for name in std::mem::take(&mut transaction.delay_add_port) {
            match self.resolve_port(&PortRef::Name(name.clone())).await {
                Some(index) => transaction.ports.add(index, ()),
                None => {
                    errors.check::<()>(Err(NetworkError::UnresolvedReference { reference: name }))?;
                }
            }
        }
        for name in std::mem::take(&mut transaction.delay_del_port) {
            match self.resolve_port(&PortRef::Name(name.clone())).await {
                Some(index) => {
                    transaction.ports.remove(&index);
                }
                None => {
                    errors.check::<()>(Err(NetworkError::UnresolvedReference { reference: name }))?;
                }
            }
        }

        let index = snapshot.index();
        Ok(Some(Prepared {
            snapshot,
            transaction,
            index,
        }))
    }

    /// Issue the create request; on an unrecoverable error the interface is
    /// detached and invalidated
    async fn create_link(&self, iface: &Arc<Interface>, name: &str, transaction: &LinkState) -> Result<Watchdog> {
        let mut request = transaction.kernel_request();
        strip_placeholder_mac(&mut request);

        let watchdog = self
            .watchdog(WatchdogFilter::new().kind(MessageKind::NewLink).ifname(name))
            .await;
        info!("creating interface {}", name);

        let error = match self.nl.link(LinkOp::Add, &request).await {
            Ok(_) => return Ok(watchdog),
            Err(e) if e.is(errno::EEXIST) => {
                debug!("interface {} already exists", name);
                return Ok(watchdog);
            }
            Err(e) if e.is(errno::EOPNOTSUPP) && request.index() != 0 => {
                debug!("kernel refused index {} for {}, retrying", request.index(), name);
                let mut retry = LinkRequest::new().with("ifname", name).with("index", 0u32);
                if let Some(kind) = request.get("kind") {
                    retry.insert("kind", kind.clone());
                }
                match self.nl.link(LinkOp::Add, &retry).await {
                    Ok(_) => return Ok(watchdog),
                    Err(e) if e.is(errno::EEXIST) => return Ok(watchdog),
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        warn!("failed to create {}: {}", name, error);
        self.detach_interface(iface).await;
        iface.invalidate().await;
        Err(error.into())
    }

    /// Steps 4-10
    async fn apply(
        &self,
        iface: &Arc<Interface>,
        prepared: Prepared,
        rollback: bool,
        errors: &mut StepErrors,
    ) -> Result<()> {
        let Prepared {
            snapshot,
            transaction,
            index,
        } = prepared;
        let patch = snapshot.diff(&transaction);
        if !patch.is_empty() {
            debug!(
                "applying to {} ({}): {}",
                iface.label().await,
                index,
                Value::Object(patch.render())
            );
        }

        self.apply_vlans(iface, index, &snapshot, &transaction, &patch, errors)
            .await?;
        self.apply_ports(iface, index, &transaction, &patch, errors)
            .await?;
        let moved = self
            .apply_attributes(iface, index, &snapshot, &transaction, &patch, errors)
            .await?;
        self.apply_addresses(iface, index, &snapshot, &transaction, &patch, errors)
            .await?;
        self.run_hooks(iface, &snapshot, &transaction, errors).await?;

        if self
            .apply_removal(iface, index, &transaction, &patch, rollback, errors)
            .await?
        {
            return Ok(());
        }

        if !errors.partial {
            self.settle(iface, index, moved).await?;
        }
        Ok(())
    }

    /// Step 4: bridge VLAN filters
    async fn apply_vlans(
        &self,
        iface: &Interface,
        index: u32,
        snapshot: &LinkState,
        transaction: &LinkState,
        patch: &Patch,
        errors: &mut StepErrors,
    ) -> Result<()> {
        if patch.vlans.is_empty() {
            return Ok(());
        }
        let waiter = iface.set_vlans_target(transaction.vlans.key_set()).await;

        for vid in &patch.vlans.removed {
            let vlan = snapshot
                .vlans
                .get(vid)
                .copied()
                .unwrap_or_else(|| VlanInfo::new(*vid));
            errors.kernel(self.nl.vlan_filter(VlanOp::Delete, index, vlan).await)?;
        }
        for vid in &patch.vlans.added {
            let vlan = transaction
                .vlans
                .get(vid)
                .copied()
                .unwrap_or_else(|| VlanInfo::new(*vid));
            errors.kernel(self.nl.vlan_filter(VlanOp::Add, index, vlan).await)?;
        }

        if !errors.partial && !waiter.wait(self.settings.sync_timeout()).await {
            return Err(NetworkError::convergence("vlans target is not set"));
        }
        Ok(())
    }

    /// Step 5: attach and release ports
    async fn apply_ports(
        &self,
        iface: &Interface,
        index: u32,
        transaction: &LinkState,
        patch: &Patch,
        errors: &mut StepErrors,
    ) -> Result<()> {
        if patch.ports.is_empty() {
            return Ok(());
        }
        let timeout = self.settings.sync_timeout();
        let waiter = iface.set_ports_target(transaction.ports.key_set()).await;

        for port in &patch.ports.removed {
            self.enslave(*port, 0, errors).await?;
        }
        for port in &patch.ports.added {
            self.enslave(*port, index, errors).await?;
        }
        if errors.partial {
            return Ok(());
        }

        // the notifications may be late, load the ports explicitly
        let affected: Vec<u32> = patch.ports.affected().into_iter().collect();
        for link in self.nl.get_links(&affected).await? {
            self.device_put(&link, false).await;
        }
        if !waiter.wait(timeout).await {
            return Err(NetworkError::convergence("ports target is not set"));
        }

        for port in affected {
            let device = self.by_index(port).await.ok_or_else(|| unresolved(port))?;
            if let Some(waiter) = device.field_target("master").await {
                if !waiter.wait(timeout).await {
                    debug!("master target of {} not reached", port);
                }
            }
            device.clear_field_target("master").await;

            let master = device.master().await;
            if patch.ports.added.contains(&port) && master != Some(index) {
                return Err(NetworkError::convergence(format!("master set failed for {}", port)));
            }
            if patch.ports.removed.contains(&port) && master == Some(index) {
                return Err(NetworkError::convergence(format!("master unset failed for {}", port)));
            }
        }
        Ok(())
    }

    /// Point `port` at `master`, 0 releases it
    async fn enslave(&self, port: u32, master: u32, errors: &mut StepErrors) -> Result<()> {
        let Some(device) = self.by_index(port).await else {
            errors.check::<()>(Err(unresolved(port)))?;
            return Ok(());
        };

        let goal = (master != 0).then(|| FieldValue::from(master));
        device.set_field_target("master", goal.clone()).await?;
        device.mirror_target("master", "link").await?;

        let request = LinkRequest::new().with("index", port).with("master", master);
        if errors.kernel(self.nl.link(LinkOp::Set, &request).await)?.is_some() {
            device.propagate("master", goal).await?;
        }
        Ok(())
    }

    /// Step 6: scalar attributes. Returns true when the link left the
    /// namespace.
    async fn apply_attributes(
        &self,
        iface: &Interface,
        index: u32,
        snapshot: &LinkState,
        transaction: &LinkState,
        patch: &Patch,
        errors: &mut StepErrors,
    ) -> Result<bool> {
        let mut request: LinkRequest = transaction
            .kernel_request()
            .iter()
            .filter(|(name, _)| {
                patch.added.contains_key(*name) && !CREATE_ONLY.iter().any(|field| field == name)
            })
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        strip_placeholder_mac(&mut request);
        request.insert("index", FieldValue::from(index));
        if request.is_noop() {
            return Ok(false);
        }

        if errors.kernel(self.nl.link(LinkOp::Set, &request).await)?.is_none() {
            return Ok(false);
        }
        let moved = request.contains("net_ns_fd") || request.contains("net_ns_pid");
        if errors.partial {
            return Ok(moved);
        }
        if moved {
            self.wait_departure(index).await?;
            return Ok(true);
        }

        let kind = transaction.kind().or_else(|| snapshot.kind());
        let mut waiters = Vec::new();
        for (name, value) in request.iter() {
            if reflected(name, kind.as_ref()) {
                let goal = match name {
                    // a released reference is absent from the mirror
                    "master" | "link" if value.as_int() == Some(0) => None,
                    _ => Some(value.clone()),
                };
                let waiter = iface.set_field_target(name, goal).await?;
                waiters.push((name.to_string(), waiter));
            }
        }
        // a rollback diffs against the mirror, it has to see the change
        for (name, waiter) in waiters {
            if !waiter.wait(self.settings.sync_timeout()).await {
                return Err(NetworkError::convergence(format!("target {} is not set", name)));
            }
        }
        Ok(false)
    }

    /// Poll until the link is gone from this namespace
    async fn wait_departure(&self, index: u32) -> Result<()> {
        loop {
            match self.nl.get_links(&[index]).await {
                Err(e) if e.is(errno::ENODEV) => return Ok(()),
                Err(e) => return Err(e.into()),
                Ok(links) if links.is_empty() => return Ok(()),
                Ok(_) => debug!("waiting for {} to leave the namespace", index),
            }
            tokio::time::sleep(self.settings.netns_poll()).await;
        }
    }

    /// Step 7: addresses
    async fn apply_addresses(
        &self,
        iface: &Interface,
        index: u32,
        snapshot: &LinkState,
        transaction: &LinkState,
        patch: &Patch,
        errors: &mut StepErrors,
    ) -> Result<()> {
        if patch.ipaddr.is_empty() {
            return Ok(());
        }
        let waiter = iface.set_ipaddr_target(transaction.ipaddr.key_set()).await;

        // secondaries first, removing a primary drops or promotes them
        let mut removed: Vec<(AddrKey, AddrExtras)> = patch
            .ipaddr
            .removed
            .iter()
            .filter(|key| !key.is_ipv6_link_local())
            .map(|key| (*key, snapshot.ipaddr.get(key).cloned().unwrap_or_default()))
            .collect();
        removed.sort_by_key(|(_, extras)| !extras.is_secondary());

        for (key, extras) in &removed {
            match self.nl.addr(AddrOp::Delete, index, *key, extras).await {
                Ok(replies) => self.update_addr(&replies, AddrOp::Delete).await,
                Err(e) if e.is(errno::EADDRNOTAVAIL) || matches!(e, KernelError::IllegalAddress(_)) => {
                    debug!("address {} already gone from {}", key, index)
                }
                Err(e) => {
                    errors.check::<()>(Err(e.into()))?;
                }
            }
        }

        let kind = transaction.kind().or_else(|| snapshot.kind());
        if !patch.ipaddr.added.is_empty() {
            let wanted: BTreeSet<AddrKey> = transaction
                .ipaddr
                .keys()
                .filter(|key| !key.is_ipv6_link_local())
                .copied()
                .collect();
            let mut pending = patch.ipaddr.added.clone();
            let mut converged = false;

            for round in 1..=self.settings.address_rounds {
                self.add_addresses(index, &pending, transaction, kind.as_ref(), errors)
                    .await?;
                if errors.partial {
                    converged = true;
                    break;
                }

                let present: BTreeSet<AddrKey> = self
                    .read_addresses(AddrFilter::Index(index))
                    .await?
                    .iter()
                    .filter(|msg| msg.index == index)
                    .map(AddrMessage::key)
                    .collect();
                let missing: BTreeSet<AddrKey> = wanted.difference(&present).copied().collect();
                if missing.is_empty() {
                    converged = true;
                    break;
                }
                debug!("round {}: {} address(es) missing on {}", round, missing.len(), index);
                pending = missing;
            }

            if !converged {
                return Err(NetworkError::convergence("ipaddr setup error"));
            }
        }
        if errors.partial {
            return Ok(());
        }

        if kind.as_ref().is_some_and(InterfaceKind::silent_ipv6_when_down) {
            // no notifications for IPv6 while such links are down
            let addrs = self.read_addresses(AddrFilter::All).await?;
            self.update_addr(&addrs, AddrOp::Add).await;
        }
        if !waiter.wait(self.settings.sync_timeout()).await {
            return Err(NetworkError::convergence("ipaddr target is not set"));
        }
        Ok(())
    }

    async fn add_addresses(
        &self,
        index: u32,
        pending: &BTreeSet<AddrKey>,
        transaction: &LinkState,
        kind: Option<&InterfaceKind>,
        errors: &mut StepErrors,
    ) -> Result<()> {
        for key in pending {
            if key.is_ipv6_link_local() {
                continue;
            }
            let extras = transaction.ipaddr.get(key).cloned().unwrap_or_default();
            let replies = errors.kernel(self.nl.addr(AddrOp::Add, index, *key, &extras).await)?;
            if let Some(replies) = replies {
                self.update_addr(&replies, AddrOp::Add).await;
                if kind == Some(&InterfaceKind::Bond) {
                    self.readd_bond_address(index, *key, &extras).await;
                }
            }
        }
        Ok(())
    }

    /// Bonds may silently drop a fresh address; add it again until the
    /// kernel reports it as existing
    async fn readd_bond_address(&self, index: u32, key: AddrKey, extras: &AddrExtras) {
        for _ in 0..self.settings.bond_readd_attempts {
            tokio::time::sleep(BOND_READD_PAUSE).await;
            match self.nl.addr(AddrOp::Add, index, key, extras).await {
                Ok(replies) => self.update_addr(&replies, AddrOp::Add).await,
                Err(e) if e.is(errno::EEXIST) => return,
                Err(e) => {
                    warn!("re-adding {} on bond {} failed: {}", key, index, e);
                    return;
                }
            }
        }
        warn!("address {} did not stick on bond {}", key, index);
    }

    /// Address dump, retried while the kernel answers EBUSY
    pub(crate) async fn read_addresses(&self, filter: AddrFilter) -> Result<Vec<AddrMessage>> {
        let mut attempt = 1;
        loop {
            match self.nl.get_addr(filter).await {
                Ok(addrs) => return Ok(addrs),
                Err(e) if e.is(errno::EBUSY) && attempt < self.settings.read_retries => {
                    debug!("address dump busy, attempt {}", attempt);
                    attempt += 1;
                    tokio::time::sleep(self.settings.busy_backoff()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Step 8
    async fn run_hooks(
        &self,
        iface: &Interface,
        snapshot: &LinkState,
        transaction: &LinkState,
        errors: &mut StepErrors,
    ) -> Result<()> {
        let hooks = self.commit_hooks().await;
        if hooks.is_empty() {
            return Ok(());
        }

        let current = iface.dump().await;
        let before = snapshot.dump();
        let desired = transaction.dump();
        for (name, hook) in hooks {
            if let Err(e) = hook.on_commit(&current, &before, &desired).await {
                errors.check::<()>(Err(NetworkError::Hook(format!("{}: {}", name, e))))?;
            }
        }
        Ok(())
    }

    /// Step 9: remove or shadow the link. Returns true when the link was
    /// deleted and the commit is complete.
    async fn apply_removal(
        &self,
        iface: &Arc<Interface>,
        index: u32,
        transaction: &LinkState,
        patch: &Patch,
        rollback: bool,
        errors: &mut StepErrors,
    ) -> Result<bool> {
        let scope = match patch.scope {
            Some(scope @ (Scope::Shadow | Scope::Remove)) => scope,
            Some(Scope::Create) if rollback => Scope::Create,
            _ => return Ok(false),
        };
        let label = iface.label().await;
        let previous = iface.scope().await;

        let watchdog = self
            .watchdog(WatchdogFilter::new().kind(MessageKind::DelLink).index(index))
            .await;
        if scope != Scope::Remove
            && errors
                .check(iface.direct(|state| state.set_scope(Scope::Locked)).await)?
                .is_none()
        {
            return Ok(true);
        }

        info!("removing interface {} ({})", label, scope);
        let request = LinkRequest::new().with("index", index);
        if errors.kernel(self.nl.link(LinkOp::Delete, &request).await)?.is_none() {
            if scope != Scope::Remove {
                errors.check(iface.direct(|state| state.set_scope(previous)).await)?;
            }
            return Ok(true);
        }
        if !watchdog.wait(self.settings.sync_timeout()).await {
            debug!("no removal notification for {}", label);
        }

        match scope {
            Scope::Shadow => {
                errors.check(iface.direct(|state| state.set_scope(Scope::Shadow)).await)?;
            }
            Scope::Create => {
                // back to a declaration, to be created by a later commit
                let mut declared = transaction.clone();
                declared.unset("index");
                // link-local addresses die with the link
                let assigned: Vec<AddrKey> = declared
                    .ipaddr
                    .keys()
                    .filter(|key| key.is_ipv6_link_local())
                    .copied()
                    .collect();
                for key in assigned {
                    declared.ipaddr.remove(&key);
                }
                iface.direct(|state| state.replace(&declared)).await?;
                self.reindex(iface).await;
            }
            _ => {}
        }
        Ok(true)
    }

    /// Step 10: wait for attribute targets, then confirm with a reload
    async fn settle(&self, iface: &Interface, index: u32, moved: bool) -> Result<()> {
        let timeout = self.settings.sync_timeout();
        for (name, waiter) in iface.field_targets().await {
            if !waiter.wait(timeout).await {
                return Err(NetworkError::convergence(format!("target {} is not set", name)));
            }
        }

        self.reload(iface, index, moved).await?;
        iface.clear_targets().await;
        tokio::time::sleep(self.settings.commit_barrier()).await;
        Ok(())
    }

    async fn reload(&self, iface: &Interface, index: u32, moved: bool) -> Result<()> {
        for attempt in 1..=self.settings.reload_attempts {
            match self.nl.get_links(&[index]).await {
                Ok(links) if !links.is_empty() => {
                    for link in &links {
                        iface.load_netlink(link).await;
                    }
                    return Ok(());
                }
                Ok(_) => debug!("empty reload of {}, attempt {}", index, attempt),
                Err(e) if moved && e.is(errno::ENODEV) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.settings.reload_interval()).await;
        }
        warn!("interface {} not reloaded", index);
        Ok(())
    }
}

fn unresolved(index: u32) -> NetworkError {
    NetworkError::UnresolvedReference {
        reference: index.to_string(),
    }
}

/// `00:00:00:00:00:00` asks the kernel to keep its own address
fn strip_placeholder_mac(request: &mut LinkRequest) {
    let placeholder = request
        .get("address")
        .and_then(FieldValue::as_mac)
        .is_some_and(|mac| mac.is_placeholder());
    if placeholder {
        request.remove("address");
        request.remove("broadcast");
    }
}

/// Whether link notifications carry `name` back, so that a target on it
/// can converge
fn reflected(name: &str, kind: Option<&InterfaceKind>) -> bool {
    match name {
        "index" | "kind" | "peer" | "net_ns_fd" | "net_ns_pid" | "bond_mode" => false,
        "vlan_id" => kind == Some(&InterfaceKind::Vlan),
        _ => match registry().get(name) {
            Some(spec) if spec.class == FieldClass::KindData => {
                kind.is_some_and(InterfaceKind::flattens_link_info)
            }
            Some(spec) => spec.class != FieldClass::Virtual,
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pve_network_core::MacAddr;

    #[test]
    fn test_placeholder_mac_is_stripped() {
        let mut request = LinkRequest::new()
            .with("ifname", "veth0")
            .with("address", "00:00:00:00:00:00".parse::<MacAddr>().unwrap())
            .with("broadcast", "ff:ff:ff:ff:ff:ff".parse::<MacAddr>().unwrap());
        strip_placeholder_mac(&mut request);
        assert!(!request.contains("address"));
        assert!(!request.contains("broadcast"));

        let mut request = LinkRequest::new()
            .with("address", "52:54:00:12:34:56".parse::<MacAddr>().unwrap());
        strip_placeholder_mac(&mut request);
        assert!(request.contains("address"));
    }

    #[test]
    fn test_reflected_fields() {
        assert!(reflected("mtu", None));
        assert!(!reflected("net_ns_fd", None));
        assert!(!reflected("ipdb_priority", None));
        assert!(reflected("vlan_id", Some(&InterfaceKind::Vlan)));
        assert!(!reflected("br_stp_state", Some(&InterfaceKind::Bridge)));
        assert!(reflected("vxlan_id", Some(&InterfaceKind::Vxlan)));
    }
}
