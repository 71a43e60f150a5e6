//! Effective-route resolution for virtual machines. Route sources are tried
//! as an explicit ordered strategy list; the final static-default source
//! always succeeds, so graph construction is never starved of routing data.

use crate::error::{ErrorKind, Result};
use crate::provider::model::{NetworkInterface, NextHopType, RouteEntry, RouteOrigin};
use crate::provider::resource_id::resource_group_from_id;
use crate::provider::NetworkProvider;
use crate::topology::machines::MachineRouteSet;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// The provider's well-known implicit routes, substituted when no route
/// source yields data: default-internet plus the private address blocks.
pub fn fallback_routes() -> Vec<RouteEntry> {
    fn implicit(prefix: &str, next_hop_type: NextHopType) -> RouteEntry {
        RouteEntry {
            address_prefix: prefix.to_string(),
            next_hop_type,
            next_hop_ip: None,
            origin: RouteOrigin::Default,
        }
    }

    vec![
        implicit("0.0.0.0/0", NextHopType::Internet),
        implicit("10.0.0.0/8", NextHopType::VnetLocal),
        implicit("172.16.0.0/12", NextHopType::VnetLocal),
        implicit("192.168.0.0/16", NextHopType::VnetLocal),
    ]
}

/// Dedupe by `(address_prefix, next_hop_type, next_hop_ip)`, keeping the
/// first occurrence of each key.
pub fn dedupe_routes(routes: Vec<RouteEntry>) -> Vec<RouteEntry> {
    let mut seen = HashSet::new();
    routes
        .into_iter()
        .filter(|route| seen.insert(route.dedupe_key()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteStrategy {
    EffectiveRouteApi,
    InterfaceRouteTable,
}

impl RouteStrategy {
    const ORDERED: [RouteStrategy; 2] = [
        RouteStrategy::EffectiveRouteApi,
        RouteStrategy::InterfaceRouteTable,
    ];

    fn label(self) -> &'static str {
        match self {
            RouteStrategy::EffectiveRouteApi => "effective_route_api",
            RouteStrategy::InterfaceRouteTable => "interface_route_table",
        }
    }
}

pub struct RouteResolver {
    provider: Arc<dyn NetworkProvider>,
}

impl RouteResolver {
    pub fn new(provider: Arc<dyn NetworkProvider>) -> Self {
        Self { provider }
    }

    /// Resolve one interface's routes through the strategy chain. The first
    /// strategy returning a non-empty set wins; `Unauthorized` aborts the
    /// chain, anything else degrades to the implicit defaults.
    pub async fn interface_routes(
        &self,
        subscription_id: &str,
        resource_group: &str,
        nic: &NetworkInterface,
    ) -> Result<Vec<RouteEntry>> {
        let nic_rg = resource_group_from_id(&nic.id)
            .unwrap_or_else(|| resource_group.to_string());

        for strategy in RouteStrategy::ORDERED {
            let attempt = match strategy {
                RouteStrategy::EffectiveRouteApi => {
                    self.provider
                        .get_effective_routes(subscription_id, &nic_rg, &nic.name)
                        .await
                }
                RouteStrategy::InterfaceRouteTable => {
                    self.provider
                        .get_interface_route_table(subscription_id, &nic_rg, &nic.name)
                        .await
                }
            };

            match attempt {
                Ok(routes) if !routes.is_empty() => {
                    debug!(
                        nic = %nic.name,
                        strategy = strategy.label(),
                        count = routes.len(),
                        "resolved interface routes"
                    );
                    return Ok(routes);
                }
                Ok(_) => {
                    debug!(nic = %nic.name, strategy = strategy.label(), "route source empty");
                }
                Err(err) if err.kind() == ErrorKind::Unauthorized => return Err(err),
                Err(err) => {
                    warn!(
                        nic = %nic.name,
                        strategy = strategy.label(),
                        error = %err,
                        "route source failed, trying next"
                    );
                }
            }
        }

        warn!(nic = %nic.name, "no route source succeeded, using implicit default routes");
        Ok(fallback_routes())
    }

    /// Merged, deduplicated effective routes across all of a machine's
    /// interfaces, the view served by the VM-detail mirror endpoint. One
    /// interface failing does not discard the others' routes.
    pub async fn resolve_vm_routes(
        &self,
        subscription_id: &str,
        resource_group: &str,
        interfaces: &[NetworkInterface],
    ) -> Result<Vec<RouteEntry>> {
        let mut merged = Vec::new();
        for nic in interfaces {
            match self
                .interface_routes(subscription_id, resource_group, nic)
                .await
            {
                Ok(routes) => merged.extend(routes),
                Err(err) if err.kind() == ErrorKind::Unauthorized => return Err(err),
                Err(err) => {
                    warn!(nic = %nic.name, error = %err, "skipping interface routes");
                }
            }
        }
        Ok(dedupe_routes(merged))
    }

    /// The machine's routing view for graph construction. Only the first
    /// interface's routes and addresses represent the machine; multi-NIC
    /// routing semantics are a known limitation, not modelled here.
    pub async fn machine_route_set(
        &self,
        subscription_id: &str,
        resource_group: &str,
        machine_name: &str,
        interfaces: &[NetworkInterface],
    ) -> Result<MachineRouteSet> {
        let Some(primary) = interfaces.first() else {
            warn!(vm = machine_name, "machine has no network interfaces");
            return Ok(MachineRouteSet {
                name: machine_name.to_string(),
                ips: Vec::new(),
                routes: Vec::new(),
            });
        };

        let routes = self
            .interface_routes(subscription_id, resource_group, primary)
            .await?;

        Ok(MachineRouteSet {
            name: machine_name.to_string(),
            ips: primary.private_ip_addresses.clone(),
            routes: dedupe_routes(routes),
        })
    }
}
