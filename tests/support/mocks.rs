#![allow(dead_code)]

use armproxy::error::{Error, Result};
use armproxy::provider::model::{
    NetworkInterface, ResourceGroup, RouteEntry, RouteTable, RouteTableSummary, Subscription,
    VirtualMachine, VirtualNetwork,
};
use armproxy::provider::resource_id::resource_group_from_id;
use armproxy::provider::NetworkProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure scripted for one mock operation.
#[derive(Clone, Copy, Debug)]
pub enum MockFailure {
    NotFound,
    Unauthorized,
    Transient,
}

impl MockFailure {
    fn to_error(self, what: &str) -> Error {
        match self {
            MockFailure::NotFound => Error::not_found(what.to_string()),
            MockFailure::Unauthorized => Error::unauthorized(what.to_string()),
            MockFailure::Transient => Error::transient(what.to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    subscriptions: Vec<Subscription>,
    vnets: Vec<VirtualNetwork>,
    vnet_failures: HashMap<String, MockFailure>,
    machines: HashMap<String, (VirtualMachine, Vec<NetworkInterface>)>,
    route_tables: HashMap<String, RouteTable>,
    effective_routes: HashMap<String, Vec<RouteEntry>>,
    effective_route_failures: HashMap<String, MockFailure>,
    interface_table_routes: HashMap<String, Vec<RouteEntry>>,
    interface_table_failures: HashMap<String, MockFailure>,
    calls: HashMap<String, u32>,
}

/// In-memory provider mock with scripted per-resource failures and call
/// counting, used by integration tests to drive recovery paths.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.lock().subscriptions.push(subscription);
    }

    pub fn add_vnet(&self, vnet: VirtualNetwork) {
        self.lock().vnets.push(vnet);
    }

    pub fn fail_vnet(&self, name: &str, failure: MockFailure) {
        self.lock().vnet_failures.insert(name.to_string(), failure);
    }

    pub fn add_machine(&self, machine: VirtualMachine, interfaces: Vec<NetworkInterface>) {
        self.lock()
            .machines
            .insert(machine.name.clone(), (machine, interfaces));
    }

    pub fn add_route_table(&self, table: RouteTable) {
        self.lock().route_tables.insert(table.name.clone(), table);
    }

    pub fn set_effective_routes(&self, nic_name: &str, routes: Vec<RouteEntry>) {
        self.lock()
            .effective_routes
            .insert(nic_name.to_string(), routes);
    }

    pub fn fail_effective_routes(&self, nic_name: &str, failure: MockFailure) {
        self.lock()
            .effective_route_failures
            .insert(nic_name.to_string(), failure);
    }

    pub fn set_interface_table_routes(&self, nic_name: &str, routes: Vec<RouteEntry>) {
        self.lock()
            .interface_table_routes
            .insert(nic_name.to_string(), routes);
    }

    pub fn fail_interface_table(&self, nic_name: &str, failure: MockFailure) {
        self.lock()
            .interface_table_failures
            .insert(nic_name.to_string(), failure);
    }

    pub fn call_count(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().expect("mock provider state")
    }

    fn record_call(&self, operation: &str) {
        *self.lock().calls.entry(operation.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl NetworkProvider for MockProvider {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.record_call("list_subscriptions");
        Ok(self.lock().subscriptions.clone())
    }

    async fn list_resource_groups(&self, _subscription_id: &str) -> Result<Vec<ResourceGroup>> {
        self.record_call("list_resource_groups");
        Ok(Vec::new())
    }

    async fn list_virtual_machines(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
    ) -> Result<Vec<VirtualMachine>> {
        self.record_call("list_virtual_machines");
        let state = self.lock();
        Ok(state
            .machines
            .values()
            .map(|(machine, _)| machine.clone())
            .collect())
    }

    async fn get_virtual_machine(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        name: &str,
    ) -> Result<(VirtualMachine, Vec<NetworkInterface>)> {
        self.record_call("get_virtual_machine");
        self.lock()
            .machines
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("virtual machine {name}")))
    }

    async fn list_route_tables(&self, subscription_id: &str) -> Result<Vec<RouteTableSummary>> {
        self.record_call("list_route_tables");
        let state = self.lock();
        Ok(state
            .route_tables
            .values()
            .map(|table| RouteTableSummary {
                id: table.id.clone(),
                name: table.name.clone(),
                location: table.location.clone(),
                resource_group: table.resource_group.clone(),
                route_count: table.routes.len(),
                subnet_count: table.subnets.len(),
                provisioning_state: table.provisioning_state.clone(),
                subscription_id: subscription_id.to_string(),
            })
            .collect())
    }

    async fn get_route_table(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        name: &str,
    ) -> Result<RouteTable> {
        self.record_call("get_route_table");
        self.lock()
            .route_tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("route table {name}")))
    }

    async fn get_effective_routes(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>> {
        self.record_call("get_effective_routes");
        let state = self.lock();
        if let Some(failure) = state.effective_route_failures.get(nic_name) {
            return Err(failure.to_error(&format!("effective routes for {nic_name}")));
        }
        Ok(state
            .effective_routes
            .get(nic_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_interface_route_table(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>> {
        self.record_call("get_interface_route_table");
        let state = self.lock();
        if let Some(failure) = state.interface_table_failures.get(nic_name) {
            return Err(failure.to_error(&format!("interface route table for {nic_name}")));
        }
        Ok(state
            .interface_table_routes
            .get(nic_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_virtual_networks(
        &self,
        _subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<VirtualNetwork>> {
        self.record_call("list_virtual_networks");
        let state = self.lock();
        Ok(state
            .vnets
            .iter()
            .filter(|vnet| match resource_group {
                Some(rg) => {
                    resource_group_from_id(&vnet.id).as_deref() == Some(rg)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_virtual_network(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork> {
        self.record_call("get_virtual_network");
        let state = self.lock();
        if let Some(failure) = state.vnet_failures.get(name) {
            return Err(failure.to_error(&format!("virtual network {name}")));
        }
        state
            .vnets
            .iter()
            .find(|vnet| vnet.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("virtual network {name}")))
    }
}
