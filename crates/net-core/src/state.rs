//! Interface record, its patch and its serializable dump

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;
use crate::fields::{registry, values_match, FieldClass};
use crate::kind::InterfaceKind;
use crate::linked_set::{IpAddrSet, PortSet, VlanSet};
use crate::transactional::Record;
use crate::types::{AddrExtras, AddrKey, FieldValue, LinkRequest, VlanInfo};

/// Lifecycle scope of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Declared, not yet in the kernel
    Create,
    /// Mirrors a kernel interface
    #[default]
    System,
    /// Removed from the kernel, kept in the mirror for re-creation
    Shadow,
    /// Notifications are ignored
    Locked,
    /// Marked for removal
    Remove,
    Invalid,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scope::Create => "create",
            Scope::System => "system",
            Scope::Shadow => "shadow",
            Scope::Locked => "locked",
            Scope::Remove => "remove",
            Scope::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Full state of one interface: scalar fields plus tracked collections
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    fields: BTreeMap<&'static str, FieldValue>,
    pub scope: Scope,
    pub ipaddr: IpAddrSet,
    pub ports: PortSet,
    pub vlans: VlanSet,
    /// Port names to attach once they can be resolved
    pub delay_add_port: BTreeSet<String>,
    /// Port names to detach once they can be resolved
    pub delay_del_port: BTreeSet<String>,
    /// Commit collects step errors instead of rolling back
    pub partial: bool,
}

impl LinkState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a registered field, checking the value type
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), ConfigError> {
        let spec = registry().validate(name, &value)?;
        self.fields.insert(spec.name, value);
        Ok(())
    }

    pub(crate) fn set_static(&mut self, name: &'static str, value: FieldValue) {
        self.fields.insert(name, value);
    }

    pub fn unset(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    pub(crate) fn clear_fields(&mut self) {
        self.fields.clear();
    }

    fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name)
            .and_then(FieldValue::as_int)
            .and_then(|value| u32::try_from(value).ok())
    }

    /// Kernel index, 0 while unknown
    pub fn index(&self) -> u32 {
        self.get_u32("index").unwrap_or(0)
    }

    pub fn ifname(&self) -> Option<&str> {
        self.get("ifname").and_then(FieldValue::as_text)
    }

    pub fn kind(&self) -> Option<InterfaceKind> {
        self.get("kind")
            .and_then(FieldValue::as_text)
            .map(InterfaceKind::from)
    }

    pub fn master(&self) -> Option<u32> {
        self.get_u32("master").filter(|index| *index > 0)
    }

    pub fn flags(&self) -> Option<i64> {
        self.get("flags").and_then(FieldValue::as_int)
    }

    /// Fields of one class, as a link request
    pub fn filter(&self, class: FieldClass) -> LinkRequest {
        let registry = registry();
        self.fields
            .iter()
            .filter(|(name, _)| registry.get(name).map(|spec| spec.class) == Some(class))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Every field the kernel understands: common and kind specific ones
    pub fn kernel_request(&self) -> LinkRequest {
        let registry = registry();
        self.fields
            .iter()
            .filter(|(name, _)| {
                registry
                    .get(name)
                    .map(|spec| spec.class != FieldClass::Virtual)
                    .unwrap_or(false)
            })
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn dump(&self) -> InterfaceDump {
        InterfaceDump {
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            scope: self.scope,
            ipaddr: self
                .ipaddr
                .iter()
                .map(|(key, extras)| AddrDump {
                    address: *key,
                    extras: extras.clone(),
                })
                .collect(),
            ports: self.ports.keys().copied().collect(),
            vlans: self.vlans.iter().map(|(_, info)| *info).collect(),
        }
    }
}

/// Added and removed keys of one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<K> {
    pub added: BTreeSet<K>,
    pub removed: BTreeSet<K>,
}

impl<K> Default for Delta<K> {
    fn default() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone> Delta<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Keys touched in either direction
    pub fn affected(&self) -> BTreeSet<K> {
        self.added.union(&self.removed).cloned().collect()
    }
}

/// Difference between the snapshot and a transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    /// Fields whose desired value differs, with the desired value
    pub added: BTreeMap<&'static str, FieldValue>,
    /// Fields whose current value is replaced or dropped, with the current value
    pub removed: BTreeMap<&'static str, FieldValue>,
    pub scope: Option<Scope>,
    pub ipaddr: Delta<AddrKey>,
    pub ports: Delta<u32>,
    pub vlans: Delta<u16>,
    /// Unresolved port names
    pub deferred_ports: Delta<String>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.scope.is_none()
            && self.ipaddr.is_empty()
            && self.ports.is_empty()
            && self.vlans.is_empty()
            && self.deferred_ports.is_empty()
    }

    /// Render the patch as a mapping.
    ///
    /// Changed fields map to their desired value, dropped ones appear as
    /// `-name`. Collections appear as `+ipaddr`/`-ipaddr` and so on, and
    /// unresolved ports are listed as `*name` among `+ports`/`-ports`.
    pub fn render(&self) -> Map<String, Value> {
        let mut review = Map::new();

        for (name, value) in &self.added {
            review.insert(name.to_string(), json!(value));
        }
        for (name, value) in &self.removed {
            if !self.added.contains_key(name) {
                review.insert(format!("-{}", name), json!(value));
            }
        }
        if let Some(scope) = self.scope {
            review.insert("ipdb_scope".to_string(), json!(scope));
        }

        render_delta(&mut review, "ipaddr", &self.ipaddr, |key| json!(key.to_string()));
        render_delta(&mut review, "vlans", &self.vlans, |vid| json!(vid));

        let mut added: Vec<Value> = self.ports.added.iter().map(|index| json!(index)).collect();
        let mut removed: Vec<Value> = self.ports.removed.iter().map(|index| json!(index)).collect();
        push_deferred(&mut added, &self.deferred_ports.added);
        push_deferred(&mut removed, &self.deferred_ports.removed);
        if !added.is_empty() {
            review.insert("+ports".to_string(), Value::Array(added));
        }
        if !removed.is_empty() {
            review.insert("-ports".to_string(), Value::Array(removed));
        }

        review
    }
}

fn render_delta<K>(review: &mut Map<String, Value>, name: &str, delta: &Delta<K>, render: impl Fn(&K) -> Value) {
    if !delta.added.is_empty() {
        review.insert(format!("+{}", name), delta.added.iter().map(&render).collect());
    }
    if !delta.removed.is_empty() {
        review.insert(format!("-{}", name), delta.removed.iter().map(&render).collect());
    }
}

fn push_deferred(target: &mut Vec<Value>, names: &BTreeSet<String>) {
    target.extend(names.iter().map(|name| json!(format!("*{}", name))));
}

impl Record for LinkState {
    type Patch = Patch;

    fn diff(&self, desired: &Self) -> Patch {
        let mut patch = Patch::default();

        let names: BTreeSet<&'static str> =
            self.fields.keys().chain(desired.fields.keys()).copied().collect();
        for name in names {
            let current = self.fields.get(name);
            let wanted = desired.fields.get(name);
            if values_match(name, current, wanted) {
                continue;
            }
            if let Some(value) = wanted {
                patch.added.insert(name, value.clone());
            }
            if let Some(value) = current {
                patch.removed.insert(name, value.clone());
            }
        }

        if self.scope != desired.scope {
            patch.scope = Some(desired.scope);
        }

        patch.ipaddr = Delta {
            added: desired.ipaddr.difference(&self.ipaddr),
            removed: self.ipaddr.difference(&desired.ipaddr),
        };
        patch.ports = Delta {
            added: desired.ports.difference(&self.ports),
            removed: self.ports.difference(&desired.ports),
        };
        patch.vlans = Delta {
            added: desired.vlans.difference(&self.vlans),
            removed: self.vlans.difference(&desired.vlans),
        };
        patch.deferred_ports = Delta {
            added: desired.delay_add_port.clone(),
            removed: desired.delay_del_port.clone(),
        };

        patch
    }
}

/// One address in a dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddrDump {
    pub address: AddrKey,
    #[serde(flatten)]
    pub extras: AddrExtras,
}

/// Serializable copy of an interface record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDump {
    pub fields: BTreeMap<String, FieldValue>,
    pub scope: Scope,
    pub ipaddr: Vec<AddrDump>,
    pub ports: Vec<u32>,
    pub vlans: Vec<VlanInfo>,
}
