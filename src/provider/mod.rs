pub mod model;
pub mod resource_id;
pub mod rest;

use crate::error::Result;
use async_trait::async_trait;
use self::model::{
    NetworkInterface, ResourceGroup, RouteEntry, RouteTable, RouteTableSummary, Subscription,
    VirtualMachine, VirtualNetwork,
};

/// Upstream resource-manager collaborator. Every call is a potentially slow
/// network operation; implementations gate calls behind the shared
/// concurrency limiter and may fail with any of the crate's error kinds.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn list_resource_groups(&self, subscription_id: &str) -> Result<Vec<ResourceGroup>>;

    async fn list_virtual_machines(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<Vec<VirtualMachine>>;

    /// VM with its network interfaces resolved. Effective routes are not
    /// populated here; the route resolver owns that assembly.
    async fn get_virtual_machine(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<(VirtualMachine, Vec<NetworkInterface>)>;

    async fn list_route_tables(&self, subscription_id: &str) -> Result<Vec<RouteTableSummary>>;

    async fn get_route_table(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<RouteTable>;

    /// Effective routes for one network interface, as reported by the
    /// provider's effective-route API.
    async fn get_effective_routes(
        &self,
        subscription_id: &str,
        resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>>;

    /// Routes from the route table attached to the interface's subnet, for
    /// providers where the effective-route API surface is unavailable.
    async fn get_interface_route_table(
        &self,
        subscription_id: &str,
        resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>>;

    async fn list_virtual_networks(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<VirtualNetwork>>;

    async fn get_virtual_network(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork>;
}
