//! Machine route data loaded from a directory tree of per-machine JSON
//! documents (`vm_*.json`), the offline input to the connectivity command.

use crate::error::Result;
use crate::provider::model::{NextHopType, RouteEntry, RouteOrigin};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_GATEWAY_IP: &str = "20.240.246.240";

/// One machine's routing view: its name, the private addresses it answers
/// on, and the effective routes governing its traffic. Merges produce a new
/// set; an existing set is never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineRouteSet {
    pub name: String,
    pub ips: Vec<String>,
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
struct MachineDocument {
    name: String,
    network_interfaces: Vec<InterfaceDocument>,
    #[serde(default)]
    effective_routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
struct InterfaceDocument {
    #[serde(default)]
    private_ip_addresses: Vec<String>,
}

impl MachineDocument {
    fn into_route_set(self) -> MachineRouteSet {
        // The first interface defines the machine's addresses for topology
        // purposes, mirroring the primary-NIC routing simplification.
        let ips = self
            .network_interfaces
            .into_iter()
            .next()
            .map(|nic| nic.private_ip_addresses)
            .unwrap_or_default();
        MachineRouteSet {
            name: self.name,
            ips,
            routes: self.effective_routes,
        }
    }
}

/// Walk `folder` recursively and parse every `vm_*.json` document. Files
/// that do not match the expected shape are skipped with a warning.
pub fn load_machines(folder: &Path) -> Result<Vec<MachineRouteSet>> {
    let mut machines = Vec::new();
    walk_folder(folder, &mut machines)?;
    machines.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
    Ok(machines)
}

fn walk_folder(folder: &Path, machines: &mut Vec<MachineRouteSet>) -> Result<()> {
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_folder(&path, machines)?;
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !file_name.starts_with("vm_") || !file_name.ends_with(".json") {
            continue;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read machine document");
                continue;
            }
        };

        match serde_json::from_str::<MachineDocument>(&contents) {
            Ok(document) => machines.push(document.into_route_set()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not parse machine document, skipping");
            }
        }
    }
    Ok(())
}

/// Routes the gateway is configured to forward into the network. An absent
/// or unparseable file substitutes the fixed default pair.
pub fn load_gateway_routes(path: Option<&Path>) -> Vec<RouteEntry> {
    let Some(path) = path else {
        return default_gateway_routes();
    };

    let parsed = fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|contents| {
            serde_json::from_str::<Vec<RouteEntry>>(&contents).map_err(|err| err.to_string())
        });

    match parsed {
        Ok(routes) => routes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not load gateway routes, using defaults");
            default_gateway_routes()
        }
    }
}

pub fn default_gateway_routes() -> Vec<RouteEntry> {
    vec![
        gateway_route("172.20.4.0/22"),
        gateway_route("10.0.0.0/8"),
    ]
}

fn gateway_route(prefix: &str) -> RouteEntry {
    RouteEntry {
        address_prefix: prefix.to_string(),
        next_hop_type: NextHopType::VirtualNetworkGateway,
        next_hop_ip: None,
        origin: RouteOrigin::Default,
    }
}
