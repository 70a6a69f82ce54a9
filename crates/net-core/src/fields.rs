//! Static field registry
//!
//! Every attribute an interface record may carry is declared once, with the
//! value type it accepts and the class it belongs to. The registry is built
//! lazily on first use and shared read-only afterwards.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;

use crate::error::ConfigError;
use crate::kind::InterfaceKind;
use crate::types::{flags_match, FieldValue, MacAddr};

/// Value type accepted by a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Text,
    Mac,
    Ip,
}

/// Where a field comes from and whether it is sent to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Generic link attribute
    Common,
    /// Kind specific attribute, nested in the link info of a message
    KindData,
    /// Mirror bookkeeping, never sent to the kernel
    Virtual,
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub class: FieldClass,
}

pub(crate) const fn common(name: &'static str, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        class: FieldClass::Common,
    }
}

pub(crate) const fn data(name: &'static str, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        class: FieldClass::KindData,
    }
}

pub static COMMON_FIELDS: &[FieldSpec] = &[
    common("index", ValueKind::Int),
    common("flags", ValueKind::Int),
    common("ifname", ValueKind::Text),
    common("address", ValueKind::Mac),
    common("broadcast", ValueKind::Mac),
    common("mtu", ValueKind::Int),
    common("link", ValueKind::Int),
    common("qdisc", ValueKind::Text),
    common("master", ValueKind::Int),
    common("txqlen", ValueKind::Int),
    common("operstate", ValueKind::Text),
    common("linkmode", ValueKind::Int),
    common("ifalias", ValueKind::Text),
    common("net_ns_pid", ValueKind::Int),
    common("net_ns_fd", ValueKind::Int),
    common("group", ValueKind::Int),
    common("promiscuity", ValueKind::Int),
    common("num_tx_queues", ValueKind::Int),
    common("num_rx_queues", ValueKind::Int),
    common("carrier", ValueKind::Int),
    common("kind", ValueKind::Text),
    common("peer", ValueKind::Text),
    common("vlan_id", ValueKind::Int),
    common("bond_mode", ValueKind::Int),
];

pub static VIRTUAL_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "ipdb_priority",
    kind: ValueKind::Int,
    class: FieldClass::Virtual,
}];

/// Name-indexed view over every declared field
#[derive(Debug)]
pub struct FieldRegistry {
    by_name: HashMap<&'static str, &'static FieldSpec>,
}

/// The process-wide registry
pub fn registry() -> &'static FieldRegistry {
    static REGISTRY: OnceLock<FieldRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FieldRegistry::build)
}

impl FieldRegistry {
    fn build() -> Self {
        let mut by_name = HashMap::new();
        let kind_fields = InterfaceKind::builtin()
            .iter()
            .flat_map(|kind| kind.data_fields().iter());

        for spec in COMMON_FIELDS.iter().chain(VIRTUAL_FIELDS).chain(kind_fields) {
            // a common declaration wins over a kind one with the same name
            by_name.entry(spec.name).or_insert(spec);
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&'static FieldSpec> {
        self.by_name.get(name).copied()
    }

    pub fn spec(&self, name: &str) -> Result<&'static FieldSpec, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::UnknownField {
            field: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Check that `value` has the type declared for `name`
    pub fn validate(&self, name: &str, value: &FieldValue) -> Result<&'static FieldSpec, ConfigError> {
        let spec = self.spec(name)?;
        let valid = matches!(
            (spec.kind, value),
            (ValueKind::Int, FieldValue::Int(_))
                | (ValueKind::Text, FieldValue::Text(_))
                | (ValueKind::Mac, FieldValue::Mac(_))
                | (ValueKind::Ip, FieldValue::Ip(_))
        );
        if !valid {
            return Err(ConfigError::InvalidValue {
                field: name.to_string(),
                value: value.to_string(),
            });
        }
        Ok(spec)
    }

    /// Convert a JSON value into the type declared for `name`
    pub fn coerce(&self, name: &str, value: &serde_json::Value) -> Result<(&'static FieldSpec, FieldValue), ConfigError> {
        let spec = self.spec(name)?;
        let invalid = || ConfigError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
        };

        let converted = match (spec.kind, value) {
            (ValueKind::Int, serde_json::Value::Number(number)) => {
                FieldValue::Int(number.as_i64().ok_or_else(invalid)?)
            }
            (ValueKind::Int, serde_json::Value::String(text)) => {
                FieldValue::Int(text.parse().map_err(|_| invalid())?)
            }
            (ValueKind::Text, serde_json::Value::String(text)) => FieldValue::Text(text.clone()),
            (ValueKind::Mac, serde_json::Value::String(text)) => {
                FieldValue::Mac(text.parse::<MacAddr>().map_err(|_| invalid())?)
            }
            (ValueKind::Ip, serde_json::Value::String(text)) => {
                FieldValue::Ip(text.parse::<IpAddr>().map_err(|_| invalid())?)
            }
            _ => return Err(invalid()),
        };
        Ok((spec, converted))
    }
}

/// Field comparison used by diffs and convergence targets.
///
/// Flags only count the bits a user may request.
pub fn values_match(name: &str, left: Option<&FieldValue>, right: Option<&FieldValue>) -> bool {
    match (name, left, right) {
        ("flags", Some(FieldValue::Int(left)), Some(FieldValue::Int(right))) => {
            flags_match(*left, *right)
        }
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IFF_RUNNING, IFF_UP};
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert_eq!(registry.spec("mtu").unwrap().kind, ValueKind::Int);
        assert_eq!(registry.spec("br_stp_state").unwrap().class, FieldClass::KindData);
        assert_eq!(registry.spec("vlan_id").unwrap().class, FieldClass::Common);
        assert_eq!(registry.spec("ipdb_priority").unwrap().class, FieldClass::Virtual);
        assert!(matches!(
            registry.spec("no_such_field"),
            Err(ConfigError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_validate_type() {
        let registry = registry();
        assert!(registry.validate("mtu", &FieldValue::Int(1400)).is_ok());
        assert!(registry.validate("mtu", &FieldValue::from("1400")).is_err());
        assert!(registry.validate("ifname", &FieldValue::from("eth0")).is_ok());
    }

    #[test]
    fn test_coerce_json() {
        let registry = registry();
        let (_, mtu) = registry.coerce("mtu", &json!("1500")).unwrap();
        assert_eq!(mtu, FieldValue::Int(1500));

        let (_, address) = registry.coerce("address", &json!("52:54:00:12:34:56")).unwrap();
        assert!(address.as_mac().is_some());

        assert!(registry.coerce("address", &json!(12)).is_err());
    }

    #[test]
    fn test_flags_compare_masked() {
        let current = FieldValue::Int(IFF_UP | IFF_RUNNING);
        let desired = FieldValue::Int(IFF_UP);
        assert!(values_match("flags", Some(&current), Some(&desired)));
        assert!(!values_match("mtu", Some(&current), Some(&desired)));
        assert!(values_match("mtu", None, None));
    }
}
