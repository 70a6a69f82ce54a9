use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

/// Address family of a link message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    #[default]
    Unspec,
    /// AF_BRIDGE messages carry bridge VLAN information
    Bridge,
}

/// Bridge VLAN entry as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VlanInfo {
    pub vid: u16,
    #[serde(default)]
    pub flags: u16,
}

impl VlanInfo {
    pub fn new(vid: u16) -> Self {
        Self { vid, flags: 0 }
    }
}

impl From<u16> for VlanInfo {
    fn from(vid: u16) -> Self {
        Self::new(vid)
    }
}

/// Kind information nested in a link message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkInfo {
    pub kind: String,
    #[serde(default)]
    pub data: Vec<(String, FieldValue)>,
}

impl LinkInfo {
    pub fn get_attr(&self, name: &str) -> Option<&FieldValue> {
        self.data
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Family specific attributes of a link message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AfSpec {
    #[serde(default)]
    pub vlans: Vec<VlanInfo>,
}

/// Decoded RTM_NEWLINK / RTM_DELLINK message.
///
/// Attribute names are already normalized (`IFLA_MTU` -> `mtu`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkMessage {
    #[serde(default)]
    pub family: AddressFamily,
    /// Zero for broadcast notifications, the request sequence otherwise
    #[serde(default)]
    pub sequence_number: u32,
    pub index: u32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub change: u32,
    #[serde(default)]
    pub attrs: Vec<(String, FieldValue)>,
    #[serde(default)]
    pub link_info: Option<LinkInfo>,
    #[serde(default)]
    pub af_spec: Option<AfSpec>,
}

impl LinkMessage {
    pub fn new(index: u32, ifname: &str) -> Self {
        Self {
            index,
            attrs: vec![("ifname".to_string(), FieldValue::from(ifname))],
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set_attr(name, value.into());
        self
    }

    pub fn set_attr(&mut self, name: &str, value: FieldValue) {
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&FieldValue> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn ifname(&self) -> Option<&str> {
        self.get_attr("ifname").and_then(FieldValue::as_text)
    }

    /// Master index; the kernel reports 0 or omits the attribute for none
    pub fn master(&self) -> Option<u32> {
        self.get_attr("master")
            .and_then(FieldValue::as_int)
            .filter(|index| *index > 0)
            .and_then(|index| u32::try_from(index).ok())
    }

    pub fn is_broadcast(&self) -> bool {
        self.sequence_number == 0
    }
}

/// Link request operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOp {
    Add,
    Set,
    Delete,
}

/// Bridge VLAN filter operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VlanOp {
    Add,
    Delete,
}

/// Attribute set of a link create/set/delete request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkRequest {
    fields: BTreeMap<String, FieldValue>,
}

impl LinkRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn index(&self) -> u32 {
        self.get("index")
            .and_then(FieldValue::as_int)
            .and_then(|index| u32::try_from(index).ok())
            .unwrap_or(0)
    }

    pub fn ifname(&self) -> Option<&str> {
        self.get("ifname").and_then(FieldValue::as_text)
    }

    /// True when the request carries nothing but the target index
    pub fn is_noop(&self) -> bool {
        self.fields.keys().all(|key| key == "index")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, FieldValue)> for LinkRequest {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
