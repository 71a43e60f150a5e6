//! Directed reachability graph over machines and the synthetic gateway
//! node. Each edge records the address prefix that justified it; parallel
//! edges with different prefixes are kept for diagnostic output.

use crate::provider::model::{NextHopType, RouteEntry};
use crate::topology::machines::MachineRouteSet;
use crate::topology::net::{any_ip_in_prefix, parse_prefix};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

pub const GATEWAY_NODE: &str = "VirtualNetworkGateway";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub to: String,
    pub prefix: String,
}

/// Built fresh for every query over already-fetched route data; never
/// cached across queries.
#[derive(Debug, Default)]
pub struct ReachabilityGraph {
    nodes: BTreeMap<String, Vec<String>>,
    adjacency: BTreeMap<String, Vec<GraphEdge>>,
    edge_count: usize,
}

impl ReachabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str, ips: Vec<String>) {
        self.nodes.insert(name.to_string(), ips);
    }

    pub fn add_edge(&mut self, from: &str, to: &str, prefix: &str) {
        self.adjacency
            .entry(from.to_string())
            .or_default()
            .push(GraphEdge {
                to: to.to_string(),
                prefix: prefix.to_string(),
            });
        self.edge_count += 1;
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_ips(&self, name: &str) -> &[String] {
        self.nodes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn edges_from(&self, name: &str) -> &[GraphEdge] {
        self.adjacency.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Construct the graph from per-machine route sets plus the gateway's
    /// own forwarding configuration. The rules are applied independently
    /// and unioned:
    /// 1. every machine is a node, plus one gateway node;
    /// 2. machine → gateway for each `VirtualNetworkGateway` route;
    /// 3. gateway → machine for each gateway route covering a machine address;
    /// 4. machine → machine for each `VnetLocal` route covering another
    ///    machine's address (self-edges excluded).
    pub fn build(
        machines: &[MachineRouteSet],
        gateway_ip: &str,
        gateway_routes: &[RouteEntry],
    ) -> Self {
        let mut graph = Self::new();

        for machine in machines {
            graph.add_node(&machine.name, machine.ips.clone());
        }
        graph.add_node(GATEWAY_NODE, vec![gateway_ip.to_string()]);

        for machine in machines {
            for route in &machine.routes {
                if route.next_hop_type == NextHopType::VirtualNetworkGateway {
                    graph.add_edge(&machine.name, GATEWAY_NODE, &route.address_prefix);
                }
            }
        }

        for route in gateway_routes {
            if let Err(err) = parse_prefix(&route.address_prefix) {
                warn!(prefix = %route.address_prefix, error = %err, "skipping unparseable gateway route");
                continue;
            }
            for machine in machines {
                if any_ip_in_prefix(&route.address_prefix, &machine.ips) {
                    graph.add_edge(GATEWAY_NODE, &machine.name, &route.address_prefix);
                }
            }
        }

        for machine in machines {
            for route in &machine.routes {
                if route.next_hop_type != NextHopType::VnetLocal {
                    continue;
                }
                for other in machines {
                    if other.name == machine.name {
                        continue;
                    }
                    if any_ip_in_prefix(&route.address_prefix, &other.ips) {
                        graph.add_edge(&machine.name, &other.name, &route.address_prefix);
                    }
                }
            }
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built reachability graph"
        );
        graph
    }

    /// Breadth-first shortest path, source and destination inclusive.
    pub fn find_path(&self, source: &str, destination: &str) -> Option<Vec<String>> {
        if !self.contains_node(source) || !self.contains_node(destination) {
            return None;
        }
        if source == destination {
            return Some(vec![source.to_string()]);
        }

        let mut visited = BTreeSet::new();
        let mut predecessor: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::new();

        visited.insert(source);
        queue.push_back(source);

        while let Some(current) = queue.pop_front() {
            for edge in self.edges_from(current) {
                let next = edge.to.as_str();
                if !visited.insert(next) {
                    continue;
                }
                predecessor.insert(next, current);
                if next == destination {
                    let mut path = vec![destination.to_string()];
                    let mut cursor = destination;
                    while let Some(&previous) = predecessor.get(cursor) {
                        path.push(previous.to_string());
                        cursor = previous;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// Path existence between two named machines. Returns `(false, [])`
    /// both when no directed path connects the nodes and when a name is
    /// absent from the graph; the two cases are logged distinctly but
    /// intentionally share the same return shape.
    pub fn is_reachable(&self, source: &str, destination: &str) -> (bool, Vec<String>) {
        for name in [source, destination] {
            if !self.contains_node(name) {
                warn!(node = name, "machine missing from reachability graph");
                return (false, Vec::new());
            }
        }

        match self.find_path(source, destination) {
            Some(path) => (true, path),
            None => {
                warn!(source, destination, "no route between machines");
                (false, Vec::new())
            }
        }
    }

    pub fn annotate(&self, path: &[String]) -> Vec<PathHop> {
        path.iter()
            .enumerate()
            .map(|(index, node)| PathHop {
                hop: index + 1,
                node: node.clone(),
                ips: self.node_ips(node).to_vec(),
            })
            .collect()
    }
}

/// One hop of a resolved path, annotated with the node's known addresses.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PathHop {
    pub hop: usize,
    pub node: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub source: String,
    pub destination: String,
    pub reachable: bool,
    pub path: Vec<PathHop>,
}

impl ConnectivityReport {
    pub fn evaluate(graph: &ReachabilityGraph, source: &str, destination: &str) -> Self {
        let (reachable, path) = graph.is_reachable(source, destination);
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            reachable,
            path: graph.annotate(&path),
        }
    }
}
