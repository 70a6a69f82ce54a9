//! In-memory kernel for tests
//!
//! Keeps links, addresses and bridge VLANs, answers requests like the
//! kernel does and emits the matching broadcast notifications. New links get
//! an IPv6 link-local address on their own. Failures can
//! be injected per operation name (`link_add`, `link_set`, `link_delete`,
//! `addr_add`, `addr_delete`, `vlan_filter`, `get_links`, `link_lookup`,
//! `get_addr`).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use pve_network_core::fields::registry;
use pve_network_core::{
    errno, AddrExtras, AddrFilter, AddrKey, AddrMessage, AddrOp, AddressFamily, AfSpec,
    FieldClass, FieldValue, KernelError, KernelEvent, LinkInfo, LinkMessage, LinkOp,
    LinkRequest, MacAddr, VlanInfo, VlanOp, IFA_F_SECONDARY, IFF_BROADCAST, IFF_MASK, IFF_MULTICAST,
};

use crate::transport::{KernelResult, KernelTransport};

#[derive(Default)]
struct KernelState {
    links: BTreeMap<u32, LinkMessage>,
    addrs: Vec<AddrMessage>,
    vlans: BTreeMap<u32, Vec<VlanInfo>>,
    next_index: u32,
    sequence: u32,
    failures: HashMap<&'static str, VecDeque<KernelError>>,
    persistent: HashMap<&'static str, KernelError>,
    busy_reads: u32,
    calls: Vec<String>,
}

impl KernelState {
    fn failure(&mut self, op: &'static str) -> Option<KernelError> {
        if let Some(error) = self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Some(error);
        }
        self.persistent.get(op).cloned()
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence += 1;
        self.sequence
    }

    fn index_of(&self, ifname: &str) -> Option<u32> {
        self.links
            .values()
            .find(|link| link.ifname() == Some(ifname))
            .map(|link| link.index)
    }

    fn new_link(&mut self, index: u32, ifname: &str) -> LinkMessage {
        let mac: MacAddr = format!("52:54:00:00:{:02x}:{:02x}", (index >> 8) & 0xff, index & 0xff)
            .parse()
            .unwrap();
        let mut link = LinkMessage::new(index, ifname)
            .with_attr("mtu", 1500u32)
            .with_attr("address", mac);
        link.flags = (IFF_BROADCAST | IFF_MULTICAST) as u32;
        self.links.insert(index, link.clone());
        self.next_index = self.next_index.max(index + 1);
        link
    }

    fn apply_attr(link: &mut LinkMessage, name: &str, value: &FieldValue) {
        match name {
            "index" => {}
            "flags" => {
                let requested = value.as_int().unwrap_or(0) & IFF_MASK;
                link.flags = (i64::from(link.flags) & !IFF_MASK | requested) as u32;
            }
            "master" if value.as_int() == Some(0) => link.attrs.retain(|(key, _)| key != "master"),
            "kind" => {
                let kind = value.as_text().unwrap_or_default().to_string();
                link.link_info.get_or_insert_with(LinkInfo::default).kind = kind;
            }
            _ if registry().get(name).map(|spec| spec.class) == Some(FieldClass::KindData) => {
                let info = link.link_info.get_or_insert_with(LinkInfo::default);
                info.data.retain(|(key, _)| key != name);
                info.data.push((name.to_string(), value.clone()));
            }
            _ => link.set_attr(name, value.clone()),
        }
    }

    fn bridge_message(&self, index: u32) -> Option<LinkMessage> {
        let mut msg = self.links.get(&index)?.clone();
        msg.family = AddressFamily::Bridge;
        msg.af_spec = Some(AfSpec {
            vlans: self.vlans.get(&index).cloned().unwrap_or_default(),
        });
        Some(msg)
    }

    /// IPv6 link-local address derived from the link's MAC
    fn assign_link_local(&mut self, index: u32) -> AddrMessage {
        let key: AddrKey = format!("fe80::5054:ff:fe00:{:x}/64", index & 0xffff)
            .parse()
            .unwrap();
        self.insert_addr(index, key, &AddrExtras::default())
    }

    fn insert_addr(&mut self, index: u32, key: AddrKey, extras: &AddrExtras) -> AddrMessage {
        let mut msg = AddrMessage::new(index, key);
        msg.extras = extras.clone();
        msg.extras.flags = 0;
        let has_primary = self.addrs.iter().any(|addr| {
            addr.index == index && addr.key().same_network(&key) && !addr.extras.is_secondary()
        });
        if has_primary {
            msg.extras.flags |= IFA_F_SECONDARY;
        }
        self.addrs.push(msg.clone());
        msg
    }
}

pub(crate) struct FakeKernel {
    state: Mutex<KernelState>,
    events: mpsc::Sender<KernelEvent>,
}

impl FakeKernel {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Receiver<KernelEvent>) {
        let (events, receiver) = mpsc::channel(1024);
        let state = KernelState {
            next_index: 1,
            ..Default::default()
        };
        let kernel = Arc::new(Self {
            state: Mutex::new(state),
            events,
        });
        (kernel, receiver)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, KernelState> {
        self.state.lock().unwrap()
    }

    async fn emit(&self, events: Vec<KernelEvent>) {
        for event in events {
            // nobody listening is fine
            let _ = self.events.send(event).await;
        }
    }

    /// Add a link without notification; returns its index
    pub(crate) fn add_link(&self, ifname: &str, kind: Option<&str>) -> u32 {
        let mut state = self.state();
        let index = state.next_index;
        let mut link = state.new_link(index, ifname);
        if let Some(kind) = kind {
            link.link_info = Some(LinkInfo {
                kind: kind.to_string(),
                data: Vec::new(),
            });
            state.links.insert(index, link);
        }
        index
    }

    /// Set `master` of a link without notification
    pub(crate) fn set_master(&self, index: u32, master: u32) {
        if let Some(link) = self.state().links.get_mut(&index) {
            link.set_attr("master", FieldValue::from(master));
        }
    }

    /// Add an address without notification
    pub(crate) fn add_address(&self, index: u32, address: &str) {
        let key: AddrKey = address.parse().unwrap();
        self.state().insert_addr(index, key, &AddrExtras::default());
    }

    /// Change a link behind the registry's back, with notification
    pub(crate) async fn external_set(&self, index: u32, name: &str, value: FieldValue) {
        let event = {
            let mut state = self.state();
            let link = state.links.get_mut(&index).unwrap();
            KernelState::apply_attr(link, name, &value);
            KernelEvent::NewLink(link.clone())
        };
        self.emit(vec![event]).await;
    }

    pub(crate) fn fail_next(&self, op: &'static str, error: KernelError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    pub(crate) fn fail_always(&self, op: &'static str, error: KernelError) {
        self.state().persistent.insert(op, error);
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.persistent.clear();
    }

    /// Answer the next `count` address dumps with EBUSY
    pub(crate) fn busy_reads(&self, count: u32) {
        self.state().busy_reads = count;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn link(&self, index: u32) -> Option<LinkMessage> {
        self.state().links.get(&index).cloned()
    }

    pub(crate) fn lookup(&self, ifname: &str) -> Option<u32> {
        self.state().index_of(ifname)
    }

    pub(crate) fn attr(&self, index: u32, name: &str) -> Option<FieldValue> {
        self.link(index).and_then(|link| link.get_attr(name).cloned())
    }

    pub(crate) fn addresses(&self, index: u32) -> Vec<AddrKey> {
        self.state()
            .addrs
            .iter()
            .filter(|addr| addr.index == index)
            .map(AddrMessage::key)
            .collect()
    }

    pub(crate) fn vlans(&self, index: u32) -> Vec<u16> {
        self.state()
            .vlans
            .get(&index)
            .map(|vlans| vlans.iter().map(|vlan| vlan.vid).collect())
            .unwrap_or_default()
    }

    fn link_add(state: &mut KernelState, request: &LinkRequest) -> KernelResult<Vec<KernelEvent>> {
        let ifname = request
            .ifname()
            .ok_or_else(|| KernelError::netlink(errno::EINVAL))?
            .to_string();
        if state.index_of(&ifname).is_some() {
            return Err(KernelError::netlink(errno::EEXIST));
        }
        let index = match request.index() {
            0 => state.next_index,
            index if state.links.contains_key(&index) => {
                return Err(KernelError::netlink(errno::EEXIST))
            }
            index => index,
        };

        let mut link = state.new_link(index, &ifname);
        for (name, value) in request.iter() {
            match name {
                "index" | "ifname" | "peer" => {}
                "address" if value.as_mac().is_some_and(MacAddr::is_placeholder) => {}
                _ => KernelState::apply_attr(&mut link, name, value),
            }
        }
        state.links.insert(index, link.clone());
        let local = state.assign_link_local(index);
        let mut events = vec![KernelEvent::NewLink(link), KernelEvent::NewAddr(local)];

        if let Some(peer) = request.get("peer").and_then(FieldValue::as_text) {
            let peer_index = state.next_index;
            let mut peer_link = state.new_link(peer_index, peer);
            peer_link.link_info = Some(LinkInfo {
                kind: "veth".to_string(),
                data: Vec::new(),
            });
            state.links.insert(peer_index, peer_link.clone());
            let local = state.assign_link_local(peer_index);
            events.push(KernelEvent::NewLink(peer_link));
            events.push(KernelEvent::NewAddr(local));
        }
        Ok(events)
    }

    fn link_set(state: &mut KernelState, request: &LinkRequest) -> KernelResult<Vec<KernelEvent>> {
        let index = request.index();
        if !state.links.contains_key(&index) {
            return Err(KernelError::netlink(errno::ENODEV));
        }
        if request.contains("net_ns_fd") || request.contains("net_ns_pid") {
            return Ok(Self::remove_link(state, index));
        }

        let link = state
            .links
            .get_mut(&index)
            .ok_or_else(|| KernelError::netlink(errno::ENODEV))?;
        for (name, value) in request.iter() {
            if name != "index" {
                KernelState::apply_attr(link, name, value);
            }
        }
        Ok(vec![KernelEvent::NewLink(link.clone())])
    }

    fn remove_link(state: &mut KernelState, index: u32) -> Vec<KernelEvent> {
        let Some(link) = state.links.remove(&index) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let (gone, kept): (Vec<AddrMessage>, Vec<AddrMessage>) =
            state.addrs.drain(..).partition(|addr| addr.index == index);
        state.addrs = kept;
        events.extend(gone.into_iter().map(KernelEvent::DelAddr));
        state.vlans.remove(&index);

        for port in state.links.values_mut() {
            if port.master() == Some(index) {
                port.attrs.retain(|(key, _)| key != "master");
                events.push(KernelEvent::NewLink(port.clone()));
            }
        }
        events.push(KernelEvent::DelLink(link));
        events
    }
}

#[async_trait]
impl KernelTransport for FakeKernel {
    async fn link(&self, op: LinkOp, request: &LinkRequest) -> KernelResult<Vec<LinkMessage>> {
        let events = {
            let mut state = self.state();
            let (name, target) = match op {
                LinkOp::Add => ("link_add", request.ifname().unwrap_or_default().to_string()),
                LinkOp::Set => ("link_set", request.index().to_string()),
                LinkOp::Delete => ("link_delete", request.index().to_string()),
            };
            state.calls.push(format!("{} {}", name.replace('_', " "), target));
            if let Some(error) = state.failure(name) {
                return Err(error);
            }
            match op {
                LinkOp::Add => Self::link_add(&mut state, request)?,
                LinkOp::Set => Self::link_set(&mut state, request)?,
                LinkOp::Delete => {
                    let index = request.index();
                    if !state.links.contains_key(&index) {
                        return Err(KernelError::netlink(errno::ENODEV));
                    }
                    Self::remove_link(&mut state, index)
                }
            }
        };
        self.emit(events).await;
        Ok(Vec::new())
    }

    async fn addr(
        &self,
        op: AddrOp,
        index: u32,
        address: AddrKey,
        extras: &AddrExtras,
    ) -> KernelResult<Vec<AddrMessage>> {
        let (events, reply) = {
            let mut state = self.state();
            let name = match op {
                AddrOp::Add => "addr_add",
                AddrOp::Delete => "addr_delete",
            };
            state
                .calls
                .push(format!("{} {} {}", name.replace('_', " "), index, address));
            if let Some(error) = state.failure(name) {
                return Err(error);
            }
            if !state.links.contains_key(&index) {
                return Err(KernelError::netlink(errno::ENODEV));
            }
            let position = state
                .addrs
                .iter()
                .position(|addr| addr.index == index && addr.key() == address);

            match op {
                AddrOp::Add => {
                    if position.is_some() {
                        return Err(KernelError::netlink(errno::EEXIST));
                    }
                    let msg = state.insert_addr(index, address, extras);
                    let mut reply = msg.clone();
                    reply.sequence_number = state.next_sequence();
                    (vec![KernelEvent::NewAddr(msg)], reply)
                }
                AddrOp::Delete => {
                    let position =
                        position.ok_or_else(|| KernelError::netlink(errno::EADDRNOTAVAIL))?;
                    let removed = state.addrs.remove(position);
                    let mut events = vec![KernelEvent::DelAddr(removed.clone())];
                    if !removed.extras.is_secondary() {
                        // secondaries go away with their primary
                        let (gone, kept): (Vec<AddrMessage>, Vec<AddrMessage>) =
                            state.addrs.drain(..).partition(|addr| {
                                addr.index == index
                                    && addr.extras.is_secondary()
                                    && addr.key().same_network(&address)
                            });
                        state.addrs = kept;
                        events.extend(gone.into_iter().map(KernelEvent::DelAddr));
                    }
                    let mut reply = removed;
                    reply.sequence_number = state.next_sequence();
                    (events, reply)
                }
            }
        };
        self.emit(events).await;
        Ok(vec![reply])
    }

    async fn vlan_filter(&self, op: VlanOp, index: u32, vlan: VlanInfo) -> KernelResult<()> {
        let event = {
            let mut state = self.state();
            state.calls.push(format!("vlan {:?} {} {}", op, index, vlan.vid));
            if let Some(error) = state.failure("vlan_filter") {
                return Err(error);
            }
            if !state.links.contains_key(&index) {
                return Err(KernelError::netlink(errno::ENODEV));
            }
            let vlans = state.vlans.entry(index).or_default();
            vlans.retain(|known| known.vid != vlan.vid);
            if op == VlanOp::Add {
                vlans.push(vlan);
            }
            state.bridge_message(index).map(KernelEvent::NewLink)
        };
        self.emit(event.into_iter().collect()).await;
        Ok(())
    }

    async fn get_links(&self, indices: &[u32]) -> KernelResult<Vec<LinkMessage>> {
        let mut state = self.state();
        state.calls.push(format!("get_links {:?}", indices));
        if let Some(error) = state.failure("get_links") {
            return Err(error);
        }
        let sequence = state.next_sequence();
        let links: Vec<LinkMessage> = if indices.is_empty() {
            state.links.values().cloned().collect()
        } else {
            let mut links = Vec::new();
            for index in indices {
                let link = state
                    .links
                    .get(index)
                    .ok_or_else(|| KernelError::netlink(errno::ENODEV))?;
                links.push(link.clone());
            }
            links
        };
        Ok(links
            .into_iter()
            .map(|mut link| {
                link.sequence_number = sequence;
                link
            })
            .collect())
    }

    async fn link_lookup(&self, ifname: &str) -> KernelResult<Vec<u32>> {
        let mut state = self.state();
        state.calls.push(format!("link_lookup {}", ifname));
        if let Some(error) = state.failure("link_lookup") {
            return Err(error);
        }
        Ok(state.index_of(ifname).into_iter().collect())
    }

    async fn get_addr(&self, filter: AddrFilter) -> KernelResult<Vec<AddrMessage>> {
        let mut state = self.state();
        state.calls.push("get_addr".to_string());
        if state.busy_reads > 0 {
            state.busy_reads -= 1;
            return Err(KernelError::netlink(errno::EBUSY));
        }
        if let Some(error) = state.failure("get_addr") {
            return Err(error);
        }
        Ok(state
            .addrs
            .iter()
            .filter(|addr| filter.matches(addr.index))
            .cloned()
            .collect())
    }

    async fn get_vlans(&self) -> KernelResult<Vec<LinkMessage>> {
        let mut state = self.state();
        state.calls.push("get_vlans".to_string());
        let indices: Vec<u32> = state.vlans.keys().copied().collect();
        Ok(indices
            .into_iter()
            .filter_map(|index| state.bridge_message(index))
            .collect())
    }
}
