#![allow(dead_code)]

use armproxy::provider::model::{
    NetworkInterface, NextHopType, PeeringRecord, RouteEntry, RouteOrigin, VirtualNetwork,
};
use armproxy::topology::machines::MachineRouteSet;
use std::fs;
use std::path::Path;

pub fn vnet_id(subscription: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{subscription}/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{name}"
    )
}

pub fn route(prefix: &str, next_hop_type: NextHopType) -> RouteEntry {
    RouteEntry {
        address_prefix: prefix.to_string(),
        next_hop_type,
        next_hop_ip: None,
        origin: RouteOrigin::Unknown,
    }
}

pub fn machine(name: &str, ips: &[&str], routes: Vec<RouteEntry>) -> MachineRouteSet {
    MachineRouteSet {
        name: name.to_string(),
        ips: ips.iter().map(|ip| ip.to_string()).collect(),
        routes,
    }
}

pub fn peering(name: &str, remote_vnet_id: &str, state: &str) -> PeeringRecord {
    PeeringRecord {
        id: None,
        name: name.to_string(),
        remote_vnet_id: Some(remote_vnet_id.to_string()),
        peering_state: Some(state.to_string()),
        provisioning_state: Some("Succeeded".to_string()),
        allow_virtual_network_access: true,
        allow_forwarded_traffic: false,
        allow_gateway_transit: false,
        use_remote_gateways: false,
    }
}

pub fn vnet(subscription: &str, resource_group: &str, name: &str, peerings: Vec<PeeringRecord>) -> VirtualNetwork {
    VirtualNetwork {
        id: vnet_id(subscription, resource_group, name),
        name: name.to_string(),
        location: Some("westeurope".to_string()),
        address_space: vec!["10.0.0.0/16".to_string()],
        subnets: Vec::new(),
        peerings,
    }
}

pub fn nic(name: &str, resource_group: &str, ips: &[&str]) -> NetworkInterface {
    NetworkInterface {
        id: format!(
            "/subscriptions/sub-1/resourceGroups/{resource_group}/providers/Microsoft.Network/networkInterfaces/{name}"
        ),
        name: name.to_string(),
        private_ip_addresses: ips.iter().map(|ip| ip.to_string()).collect(),
        public_ip_addresses: Vec::new(),
    }
}

/// Write a per-machine JSON document the way the connectivity data folder
/// lays them out.
pub fn write_machine_file(folder: &Path, name: &str, ips: &[&str], routes: &[(&str, &str)]) {
    let document = serde_json::json!({
        "name": name,
        "network_interfaces": [
            { "private_ip_addresses": ips }
        ],
        "effective_routes": routes
            .iter()
            .map(|(prefix, next_hop)| serde_json::json!({
                "address_prefix": prefix,
                "next_hop_type": next_hop,
            }))
            .collect::<Vec<_>>(),
    });
    let path = folder.join(format!("vm_{name}.json"));
    fs::write(path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
}
