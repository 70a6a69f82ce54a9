use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::network::MacAddr;

/// Value of a single scalar interface attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Mac(MacAddr),
    Ip(IpAddr),
    Text(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_mac(&self) -> Option<&MacAddr> {
        match self {
            FieldValue::Mac(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            FieldValue::Ip(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<MacAddr> for FieldValue {
    fn from(value: MacAddr) -> Self {
        FieldValue::Mac(value)
    }
}

impl From<IpAddr> for FieldValue {
    fn from(value: IpAddr) -> Self {
        FieldValue::Ip(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{}", value),
            FieldValue::Mac(value) => write!(f, "{}", value),
            FieldValue::Ip(value) => write!(f, "{}", value),
            FieldValue::Text(value) => write!(f, "{}", value),
        }
    }
}
