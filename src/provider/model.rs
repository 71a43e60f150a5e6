//! Typed views of the provider's resources. Optional fields are explicit:
//! absence is a normal, checked state rather than a probed one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub private_ip_addresses: Vec<String>,
    #[serde(default)]
    pub public_ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub location: String,
    pub vm_size: String,
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachineDetail {
    #[serde(flatten)]
    pub machine: VirtualMachine,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub effective_routes: Vec<RouteEntry>,
}

/// Where a route sends matching traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NextHopType {
    Internet,
    VnetLocal,
    VirtualNetworkGateway,
    VirtualAppliance,
    VnetPeering,
    None,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RouteOrigin {
    Default,
    User,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One effective route as observed on a network interface. Immutable once
/// produced for a given fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteEntry {
    pub address_prefix: String,
    pub next_hop_type: NextHopType,
    #[serde(default)]
    pub next_hop_ip: Option<String>,
    #[serde(default)]
    pub origin: RouteOrigin,
}

impl RouteEntry {
    pub fn new(prefix: &str, next_hop_type: NextHopType) -> Self {
        Self {
            address_prefix: prefix.to_string(),
            next_hop_type,
            next_hop_ip: None,
            origin: RouteOrigin::Unknown,
        }
    }

    /// Uniqueness key for deduplication across route sources.
    pub fn dedupe_key(&self) -> (String, NextHopType, Option<String>) {
        (
            self.address_prefix.clone(),
            self.next_hop_type,
            self.next_hop_ip.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteTableSummary {
    pub id: String,
    pub name: String,
    pub location: String,
    pub resource_group: String,
    pub route_count: usize,
    pub subnet_count: usize,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    pub subscription_id: String,
}

/// A user-defined route inside a route table, as configured (not effective).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteTableEntry {
    pub name: String,
    pub address_prefix: String,
    pub next_hop_type: NextHopType,
    #[serde(default)]
    pub next_hop_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteTable {
    pub id: String,
    pub name: String,
    pub location: String,
    pub resource_group: String,
    #[serde(default)]
    pub routes: Vec<RouteTableEntry>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub disable_bgp_route_propagation: bool,
    pub subscription_id: String,
}

/// One-sided peering record as observed from the virtual network that owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeeringRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub remote_vnet_id: Option<String>,
    #[serde(default)]
    pub peering_state: Option<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default = "default_true")]
    pub allow_virtual_network_access: bool,
    #[serde(default)]
    pub allow_forwarded_traffic: bool,
    #[serde(default)]
    pub allow_gateway_transit: bool,
    #[serde(default)]
    pub use_remote_gateways: bool,
}

impl PeeringRecord {
    pub fn peering_state(&self) -> &str {
        self.peering_state.as_deref().unwrap_or("Unknown")
    }

    pub fn provisioning_state(&self) -> &str {
        self.provisioning_state.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub address_space: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub peerings: Vec<PeeringRecord>,
}

const fn default_true() -> bool {
    true
}
