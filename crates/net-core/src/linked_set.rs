//! Ordered collections with convergence targets
//!
//! Used for addresses, bridge/bond ports and bridge VLANs. Every mutation
//! through [`LinkedSet::add`] or [`LinkedSet::remove`] re-checks the target,
//! so a commit waiting for "ports == {2, 3}" wakes as soon as the event
//! reader applies the last port notification.

use std::collections::BTreeSet;
use std::hash::Hash;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::target::{ConvergenceTarget, TargetWaiter};
use crate::types::{AddrExtras, AddrKey, VlanInfo};

/// Interface addresses with their optional attributes
pub type IpAddrSet = LinkedSet<AddrKey, AddrExtras>;
/// Port indices of a bridge or bond
pub type PortSet = LinkedSet<u32>;
/// Bridge VLANs by id
pub type VlanSet = LinkedSet<u16, VlanInfo>;

#[derive(Debug)]
pub struct LinkedSet<K, V = ()> {
    members: IndexMap<K, V>,
    target: ConvergenceTarget<BTreeSet<K>>,
}

impl<K, V> Default for LinkedSet<K, V> {
    fn default() -> Self {
        Self {
            members: IndexMap::new(),
            target: ConvergenceTarget::new(),
        }
    }
}

/// Cloning copies the members only; the copy starts with a fresh target.
impl<K: Clone, V: Clone> Clone for LinkedSet<K, V> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            target: ConvergenceTarget::new(),
        }
    }
}

impl<K, V> LinkedSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a member, then re-check the target
    pub fn add(&mut self, key: K, payload: V) {
        self.members.insert(key, payload);
        self.check_target();
    }

    /// Remove a member, then re-check the target
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.members.shift_remove(key);
        self.check_target();
        removed
    }

    /// Remove a member without touching the target
    pub fn unlink(&mut self, key: &K) -> Option<V> {
        self.members.shift_remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.members.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.members.get(key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.members.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.members.iter()
    }

    pub fn key_set(&self) -> BTreeSet<K> {
        self.members.keys().cloned().collect()
    }

    /// Members of `self` that are not in `other`
    pub fn difference(&self, other: &Self) -> BTreeSet<K> {
        self.members
            .keys()
            .filter(|key| !other.contains(key))
            .cloned()
            .collect()
    }

    /// Expect the membership to become exactly `goal`
    pub fn set_target(&mut self, goal: BTreeSet<K>) -> TargetWaiter {
        let current = self.key_set();
        self.target.set_target(goal, &current)
    }

    pub fn clear_target(&mut self) {
        self.target.clear();
    }

    pub fn target(&self) -> Option<&BTreeSet<K>> {
        self.target.goal()
    }

    pub fn target_reached(&self) -> bool {
        self.target.is_set()
    }

    pub fn waiter(&self) -> TargetWaiter {
        self.target.waiter()
    }

    fn check_target(&self) {
        let members = &self.members;
        self.target.check(|goal| {
            goal.len() == members.len() && goal.iter().all(|key| members.contains_key(key))
        });
    }
}

impl<K, V> Serialize for LinkedSet<K, V>
where
    K: Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.members.keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_target_reached_on_add() {
        let mut ports = PortSet::new();
        ports.add(2, ());
        let waiter = ports.set_target([2, 3].into_iter().collect());
        assert!(!waiter.is_set());

        ports.add(3, ());
        assert!(ports.target_reached());
        assert!(waiter.wait(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_unlink_skips_target() {
        let mut ports = PortSet::new();
        ports.add(2, ());
        ports.add(3, ());
        ports.set_target([2].into_iter().collect());

        ports.unlink(&3);
        assert!(!ports.target_reached());
        ports.remove(&4);
        assert!(ports.target_reached());
    }

    #[test]
    fn test_clone_drops_target() {
        let mut addrs = IpAddrSet::new();
        let key: AddrKey = "10.0.0.1/24".parse().unwrap();
        addrs.add(key, AddrExtras::default());
        addrs.set_target(BTreeSet::new());

        let copy = addrs.clone();
        assert!(copy.contains(&key));
        assert!(copy.target().is_none());
        assert_eq!(addrs.difference(&IpAddrSet::new()), [key].into_iter().collect());
    }

    #[test]
    fn test_insertion_order() {
        let mut vlans = VlanSet::new();
        vlans.add(20, VlanInfo::new(20));
        vlans.add(10, VlanInfo::new(10));
        vlans.remove(&20);
        vlans.add(30, VlanInfo::new(30));
        assert_eq!(vlans.keys().copied().collect::<Vec<_>>(), vec![10, 30]);
        assert_eq!(serde_json::to_string(&vlans).unwrap(), "[10,30]");
    }
}
