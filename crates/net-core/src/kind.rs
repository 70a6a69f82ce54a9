//! Interface kinds and their kind specific attributes

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::fields::{data, FieldSpec, ValueKind};

static BRIDGE_FIELDS: &[FieldSpec] = &[
    data("br_forward_delay", ValueKind::Int),
    data("br_hello_time", ValueKind::Int),
    data("br_max_age", ValueKind::Int),
    data("br_ageing_time", ValueKind::Int),
    data("br_stp_state", ValueKind::Int),
    data("br_priority", ValueKind::Int),
    data("br_vlan_filtering", ValueKind::Int),
];

static BOND_FIELDS: &[FieldSpec] = &[
    data("bond_mode", ValueKind::Int),
    data("bond_miimon", ValueKind::Int),
    data("bond_updelay", ValueKind::Int),
    data("bond_downdelay", ValueKind::Int),
    data("bond_use_carrier", ValueKind::Int),
    data("bond_primary", ValueKind::Int),
    data("bond_xmit_hash_policy", ValueKind::Int),
    data("bond_min_links", ValueKind::Int),
];

static VLAN_FIELDS: &[FieldSpec] = &[
    data("vlan_id", ValueKind::Int),
    data("vlan_flags", ValueKind::Int),
    data("vlan_protocol", ValueKind::Int),
];

static VXLAN_FIELDS: &[FieldSpec] = &[
    data("vxlan_id", ValueKind::Int),
    data("vxlan_group", ValueKind::Ip),
    data("vxlan_local", ValueKind::Ip),
    data("vxlan_link", ValueKind::Int),
    data("vxlan_ttl", ValueKind::Int),
    data("vxlan_tos", ValueKind::Int),
    data("vxlan_port", ValueKind::Int),
    data("vxlan_learning", ValueKind::Int),
];

static GRE_FIELDS: &[FieldSpec] = &[
    data("gre_local", ValueKind::Ip),
    data("gre_remote", ValueKind::Ip),
    data("gre_ttl", ValueKind::Int),
    data("gre_ikey", ValueKind::Int),
    data("gre_okey", ValueKind::Int),
    data("gre_iflags", ValueKind::Int),
    data("gre_oflags", ValueKind::Int),
    data("gre_link", ValueKind::Int),
];

static MACVLAN_FIELDS: &[FieldSpec] = &[data("macvlan_mode", ValueKind::Int)];
static MACVTAP_FIELDS: &[FieldSpec] = &[data("macvtap_mode", ValueKind::Int)];
static IPVLAN_FIELDS: &[FieldSpec] = &[data("ipvlan_mode", ValueKind::Int)];

static TUNTAP_FIELDS: &[FieldSpec] = &[
    data("mode", ValueKind::Text),
    data("uid", ValueKind::Int),
    data("gid", ValueKind::Int),
    data("ifr", ValueKind::Int),
];

static VRF_FIELDS: &[FieldSpec] = &[data("vrf_table", ValueKind::Int)];

static BUILTIN_KINDS: [InterfaceKind; 13] = [
    InterfaceKind::Bridge,
    InterfaceKind::Bond,
    InterfaceKind::Veth,
    InterfaceKind::Vlan,
    InterfaceKind::Vxlan,
    InterfaceKind::Gre,
    InterfaceKind::Gretap,
    InterfaceKind::Macvlan,
    InterfaceKind::Macvtap,
    InterfaceKind::Ipvlan,
    InterfaceKind::Tuntap,
    InterfaceKind::Vrf,
    InterfaceKind::Dummy,
];

/// Interface kind, as reported in the link info of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Bridge,
    Bond,
    Veth,
    Vlan,
    Vxlan,
    Gre,
    Gretap,
    Macvlan,
    Macvtap,
    Ipvlan,
    Tuntap,
    Vrf,
    Dummy,
    /// Kinds without a declared schema; carried through unchanged
    Other(String),
}

impl InterfaceKind {
    /// All kinds with a declared schema
    pub fn builtin() -> &'static [InterfaceKind] {
        &BUILTIN_KINDS
    }

    pub fn as_str(&self) -> &str {
        match self {
            InterfaceKind::Bridge => "bridge",
            InterfaceKind::Bond => "bond",
            InterfaceKind::Veth => "veth",
            InterfaceKind::Vlan => "vlan",
            InterfaceKind::Vxlan => "vxlan",
            InterfaceKind::Gre => "gre",
            InterfaceKind::Gretap => "gretap",
            InterfaceKind::Macvlan => "macvlan",
            InterfaceKind::Macvtap => "macvtap",
            InterfaceKind::Ipvlan => "ipvlan",
            InterfaceKind::Tuntap => "tuntap",
            InterfaceKind::Vrf => "vrf",
            InterfaceKind::Dummy => "dummy",
            InterfaceKind::Other(name) => name,
        }
    }

    /// Kind specific attributes
    pub fn data_fields(&self) -> &'static [FieldSpec] {
        match self {
            InterfaceKind::Bridge => BRIDGE_FIELDS,
            InterfaceKind::Bond => BOND_FIELDS,
            InterfaceKind::Vlan => VLAN_FIELDS,
            InterfaceKind::Vxlan => VXLAN_FIELDS,
            InterfaceKind::Gre | InterfaceKind::Gretap => GRE_FIELDS,
            InterfaceKind::Macvlan => MACVLAN_FIELDS,
            InterfaceKind::Macvtap => MACVTAP_FIELDS,
            InterfaceKind::Ipvlan => IPVLAN_FIELDS,
            InterfaceKind::Tuntap => TUNTAP_FIELDS,
            InterfaceKind::Vrf => VRF_FIELDS,
            InterfaceKind::Veth | InterfaceKind::Dummy | InterfaceKind::Other(_) => &[],
        }
    }

    /// Whether every link info data attribute is copied into the record
    pub fn flattens_link_info(&self) -> bool {
        matches!(
            self,
            InterfaceKind::Vxlan
                | InterfaceKind::Macvlan
                | InterfaceKind::Macvtap
                | InterfaceKind::Gre
                | InterfaceKind::Gretap
                | InterfaceKind::Ipvlan
        )
    }

    /// Kinds that emit no IPv6 address notifications while down
    pub fn silent_ipv6_when_down(&self) -> bool {
        matches!(
            self,
            InterfaceKind::Bond | InterfaceKind::Bridge | InterfaceKind::Veth
        )
    }
}

impl FromStr for InterfaceKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = InterfaceKind::builtin()
            .iter()
            .find(|kind| kind.as_str() == s)
            .cloned()
            .unwrap_or_else(|| InterfaceKind::Other(s.to_string()));
        Ok(kind)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for InterfaceKind {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}
