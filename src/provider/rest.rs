//! REST implementation of [`NetworkProvider`] against the resource-manager
//! API. Every request passes through the shared concurrency limiter and the
//! transient-retry policy; response status codes are mapped onto the crate's
//! error kinds so callers can apply recovery policy uniformly.

use crate::config::UpstreamConfig;
use crate::error::{Context, Error, Result};
use crate::limiter::ConcurrencyLimiter;
use crate::provider::model::{
    NetworkInterface, NextHopType, PeeringRecord, ResourceGroup, RouteEntry, RouteOrigin,
    RouteTable, RouteTableEntry, RouteTableSummary, Subscription, VirtualMachine, VirtualNetwork,
};
use crate::provider::resource_id::{leaf_name, resource_group_from_id};
use crate::provider::NetworkProvider;
use crate::retry::{retry_transient, RetryPolicy};
use crate::telemetry::runtime_counters;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

const NETWORK_API_VERSION: &str = "2023-05-01";
const COMPUTE_API_VERSION: &str = "2023-07-01";
const SUBSCRIPTION_API_VERSION: &str = "2022-12-01";
const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";

// The effective-route call is a long-running operation; the provider answers
// 202 with a poll URL until the result is ready.
const LRO_POLL_ATTEMPTS: u32 = 10;
const LRO_POLL_DELAY_MS: u64 = 500;

pub struct RestProvider {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
}

impl RestProvider {
    pub fn new(
        config: &UpstreamConfig,
        limiter: ConcurrencyLimiter,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build upstream HTTP client")?;
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid upstream base url `{}`", config.base_url))?;

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone(),
            limiter,
            retry,
        })
    }

    fn url(&self, path: &str, api_version: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("failed to resolve path `{path}`"))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Issue one request with a limiter permit held for its whole duration,
    /// retrying transient failures per policy.
    async fn execute(&self, operation: &str, method: Method, url: Url) -> Result<JsonValue> {
        let result = retry_transient(&self.retry, operation, || {
            let method = method.clone();
            let url = url.clone();
            async move {
                let _permit = self.limiter.acquire().await;
                self.dispatch(method, url).await
            }
        })
        .await;

        match &result {
            Ok(_) => runtime_counters().record_upstream_success(operation),
            Err(err) => runtime_counters().record_upstream_failure(operation, err.kind().label()),
        }
        result
    }

    async fn dispatch(&self, method: Method, url: Url) -> Result<JsonValue> {
        let mut request = self.client.request(method, url.clone());
        if let Some(token) = &self.access_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::ACCEPTED {
            let poll_url = response
                .headers()
                .get("location")
                .or_else(|| response.headers().get("azure-asyncoperation"))
                .and_then(|value| value.to_str().ok())
                .map(Url::parse)
                .transpose()
                .context("invalid poll URL on accepted response")?
                .ok_or_else(|| Error::transient("accepted response without poll URL"))?;
            return self.poll_operation(poll_url).await;
        }

        if !status.is_success() {
            return Err(status_error(status, &url));
        }

        Ok(response.json().await?)
    }

    async fn poll_operation(&self, poll_url: Url) -> Result<JsonValue> {
        for _ in 0..LRO_POLL_ATTEMPTS {
            tokio::time::sleep(std::time::Duration::from_millis(LRO_POLL_DELAY_MS)).await;

            let mut request = self.client.get(poll_url.clone());
            if let Some(token) = &self.access_token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::ACCEPTED {
                continue;
            }
            if !status.is_success() {
                return Err(status_error(status, &poll_url));
            }
            return Ok(response.json().await?);
        }
        Err(Error::transient(format!(
            "long-running operation did not complete: {poll_url}"
        )))
    }

    async fn get_network_interface(&self, nic_id: &str) -> Result<NetworkInterface> {
        let url = self.url(nic_id, NETWORK_API_VERSION)?;
        let body = self
            .execute("get_network_interface", Method::GET, url)
            .await?;
        Ok(network_interface_from_wire(&body))
    }
}

fn status_error(status: StatusCode, url: &Url) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::unauthorized(format!("{status} from {url}"))
        }
        StatusCode::NOT_FOUND => Error::not_found(format!("{status} from {url}")),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::transient(format!("{status} from {url}"))
        }
        status if status.is_server_error() => Error::transient(format!("{status} from {url}")),
        status => Error::msg(format!("unexpected {status} from {url}")),
    }
}

#[async_trait]
impl NetworkProvider for RestProvider {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let url = self.url("/subscriptions", SUBSCRIPTION_API_VERSION)?;
        let body = self.execute("list_subscriptions", Method::GET, url).await?;
        Ok(wire_list(&body)
            .iter()
            .filter_map(|item| {
                Some(Subscription {
                    id: str_field(item, "id")?,
                    name: str_field(item, "subscriptionId")?,
                    display_name: str_field(item, "displayName"),
                    state: str_field(item, "state").unwrap_or_else(|| "Unknown".to_string()),
                })
            })
            .collect())
    }

    async fn list_resource_groups(&self, subscription_id: &str) -> Result<Vec<ResourceGroup>> {
        let path = format!("/subscriptions/{subscription_id}/resourcegroups");
        let url = self.url(&path, RESOURCE_GROUP_API_VERSION)?;
        let body = self.execute("list_resource_groups", Method::GET, url).await?;
        Ok(wire_list(&body)
            .iter()
            .filter_map(|item| {
                Some(ResourceGroup {
                    id: str_field(item, "id")?,
                    name: str_field(item, "name")?,
                    location: str_field(item, "location").unwrap_or_default(),
                    tags: item.get("tags").and_then(|tags| {
                        serde_json::from_value(tags.clone()).ok()
                    }),
                })
            })
            .collect())
    }

    async fn list_virtual_machines(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<Vec<VirtualMachine>> {
        let path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines"
        );
        let url = self.url(&path, COMPUTE_API_VERSION)?;
        let body = self
            .execute("list_virtual_machines", Method::GET, url)
            .await?;
        Ok(wire_list(&body)
            .iter()
            .filter_map(virtual_machine_from_wire)
            .collect())
    }

    async fn get_virtual_machine(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<(VirtualMachine, Vec<NetworkInterface>)> {
        let path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{name}"
        );
        let url = self.url(&path, COMPUTE_API_VERSION)?;
        let body = self.execute("get_virtual_machine", Method::GET, url).await?;
        let machine = virtual_machine_from_wire(&body)
            .ok_or_else(|| Error::parse(format!("malformed virtual machine document: {name}")))?;

        let nic_ids: Vec<String> = body
            .pointer("/properties/networkProfile/networkInterfaces")
            .and_then(JsonValue::as_array)
            .map(|nics| {
                nics.iter()
                    .filter_map(|nic| str_field(nic, "id"))
                    .collect()
            })
            .unwrap_or_default();

        let mut interfaces = Vec::with_capacity(nic_ids.len());
        for nic_id in &nic_ids {
            match self.get_network_interface(nic_id).await {
                Ok(nic) => interfaces.push(nic),
                Err(err) => {
                    warn!(vm = name, nic_id = %nic_id, error = %err, "failed to resolve network interface");
                }
            }
        }

        Ok((machine, interfaces))
    }

    async fn list_route_tables(&self, subscription_id: &str) -> Result<Vec<RouteTableSummary>> {
        let path = format!(
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/routeTables"
        );
        let url = self.url(&path, NETWORK_API_VERSION)?;
        let body = self.execute("list_route_tables", Method::GET, url).await?;
        Ok(wire_list(&body)
            .iter()
            .filter_map(|item| {
                let id = str_field(item, "id")?;
                let resource_group =
                    resource_group_from_id(&id).unwrap_or_else(|| "unknown".to_string());
                let routes = item
                    .pointer("/properties/routes")
                    .and_then(JsonValue::as_array);
                let subnets = item
                    .pointer("/properties/subnets")
                    .and_then(JsonValue::as_array);
                Some(RouteTableSummary {
                    name: str_field(item, "name")?,
                    location: str_field(item, "location").unwrap_or_default(),
                    resource_group,
                    route_count: routes.map(Vec::len).unwrap_or(0),
                    subnet_count: subnets.map(Vec::len).unwrap_or(0),
                    provisioning_state: item
                        .pointer("/properties/provisioningState")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    subscription_id: subscription_id.to_string(),
                    id,
                })
            })
            .collect())
    }

    async fn get_route_table(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<RouteTable> {
        let path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network/routeTables/{name}"
        );
        let url = self.url(&path, NETWORK_API_VERSION)?;
        let body = self.execute("get_route_table", Method::GET, url).await?;

        let routes = body
            .pointer("/properties/routes")
            .and_then(JsonValue::as_array)
            .map(|routes| {
                routes
                    .iter()
                    .filter_map(|route| {
                        Some(RouteTableEntry {
                            name: str_field(route, "name")?,
                            address_prefix: route
                                .pointer("/properties/addressPrefix")
                                .and_then(JsonValue::as_str)?
                                .to_string(),
                            next_hop_type: next_hop_type_from_wire(
                                route.pointer("/properties/nextHopType"),
                            ),
                            next_hop_ip: route
                                .pointer("/properties/nextHopIpAddress")
                                .and_then(JsonValue::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let subnets = body
            .pointer("/properties/subnets")
            .and_then(JsonValue::as_array)
            .map(|subnets| {
                subnets
                    .iter()
                    .filter_map(|subnet| str_field(subnet, "id"))
                    .collect()
            })
            .unwrap_or_default();

        Ok(RouteTable {
            id: str_field(&body, "id")
                .ok_or_else(|| Error::parse(format!("route table without id: {name}")))?,
            name: name.to_string(),
            location: str_field(&body, "location").unwrap_or_default(),
            resource_group: resource_group.to_string(),
            routes,
            subnets,
            provisioning_state: body
                .pointer("/properties/provisioningState")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            disable_bgp_route_propagation: body
                .pointer("/properties/disableBgpRoutePropagation")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            subscription_id: subscription_id.to_string(),
        })
    }

    async fn get_effective_routes(
        &self,
        subscription_id: &str,
        resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>> {
        let path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network/networkInterfaces/{nic_name}/effectiveRouteTable"
        );
        let url = self.url(&path, NETWORK_API_VERSION)?;
        // effectiveRouteTable is a POST-triggered long-running operation.
        let body = self
            .execute("get_effective_routes", Method::POST, url)
            .await?;

        Ok(wire_list(&body)
            .iter()
            .map(effective_route_from_wire)
            .collect())
    }

    async fn get_interface_route_table(
        &self,
        subscription_id: &str,
        resource_group: &str,
        nic_name: &str,
    ) -> Result<Vec<RouteEntry>> {
        let nic_path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network/networkInterfaces/{nic_name}"
        );
        let url = self.url(&nic_path, NETWORK_API_VERSION)?;
        let nic = self
            .execute("get_interface_route_table", Method::GET, url)
            .await?;

        // NIC -> ip configuration -> subnet -> attached route table.
        let subnet_ids: Vec<String> = nic
            .pointer("/properties/ipConfigurations")
            .and_then(JsonValue::as_array)
            .map(|configs| {
                configs
                    .iter()
                    .filter_map(|config| {
                        config
                            .pointer("/properties/subnet/id")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut routes = Vec::new();
        for subnet_id in &subnet_ids {
            let url = self.url(subnet_id, NETWORK_API_VERSION)?;
            let subnet = match self.execute("get_subnet", Method::GET, url).await {
                Ok(subnet) => subnet,
                Err(err) => {
                    debug!(subnet_id = %subnet_id, error = %err, "failed to resolve subnet for route lookup");
                    continue;
                }
            };

            let Some(route_table_id) = subnet
                .pointer("/properties/routeTable/id")
                .and_then(JsonValue::as_str)
            else {
                continue;
            };

            let Some(rg) = resource_group_from_id(route_table_id) else {
                continue;
            };
            let Some(table_name) = leaf_name(route_table_id) else {
                continue;
            };

            match self.get_route_table(subscription_id, &rg, table_name).await {
                Ok(table) => {
                    routes.extend(table.routes.into_iter().map(|entry| RouteEntry {
                        address_prefix: entry.address_prefix,
                        next_hop_type: entry.next_hop_type,
                        next_hop_ip: entry.next_hop_ip,
                        origin: RouteOrigin::User,
                    }));
                }
                Err(err) => {
                    debug!(route_table_id, error = %err, "failed to fetch subnet route table");
                }
            }
        }

        Ok(routes)
    }

    async fn list_virtual_networks(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<VirtualNetwork>> {
        let path = match resource_group {
            Some(rg) => format!(
                "/subscriptions/{subscription_id}/resourceGroups/{rg}/providers/Microsoft.Network/virtualNetworks"
            ),
            None => format!(
                "/subscriptions/{subscription_id}/providers/Microsoft.Network/virtualNetworks"
            ),
        };
        let url = self.url(&path, NETWORK_API_VERSION)?;
        let body = self
            .execute("list_virtual_networks", Method::GET, url)
            .await?;
        Ok(wire_list(&body)
            .iter()
            .filter_map(virtual_network_from_wire)
            .collect())
    }

    async fn get_virtual_network(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetwork> {
        let path = format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{name}"
        );
        let url = self.url(&path, NETWORK_API_VERSION)?;
        let body = self.execute("get_virtual_network", Method::GET, url).await?;
        virtual_network_from_wire(&body)
            .ok_or_else(|| Error::parse(format!("malformed virtual network document: {name}")))
    }
}

fn wire_list(body: &JsonValue) -> Vec<JsonValue> {
    body.get("value")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_field(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

/// The provider reports some fields as either a scalar or a one-element
/// list depending on resource type; take the first element in the latter case.
fn scalar_or_first(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(items) => items.first().and_then(JsonValue::as_str).map(str::to_string),
        _ => None,
    }
}

fn next_hop_type_from_wire(value: Option<&JsonValue>) -> NextHopType {
    value
        .and_then(JsonValue::as_str)
        .and_then(|name| serde_json::from_value(JsonValue::String(name.to_string())).ok())
        .unwrap_or(NextHopType::Unknown)
}

fn effective_route_from_wire(route: &JsonValue) -> RouteEntry {
    let origin = match route.get("source").and_then(JsonValue::as_str) {
        Some("Default") => RouteOrigin::Default,
        Some("User") => RouteOrigin::User,
        _ => RouteOrigin::Unknown,
    };
    RouteEntry {
        address_prefix: scalar_or_first(route.get("addressPrefix")).unwrap_or_default(),
        next_hop_type: next_hop_type_from_wire(route.get("nextHopType")),
        next_hop_ip: scalar_or_first(route.get("nextHopIpAddress")),
        origin,
    }
}

fn network_interface_from_wire(body: &JsonValue) -> NetworkInterface {
    let configs = body
        .pointer("/properties/ipConfigurations")
        .and_then(JsonValue::as_array);
    let private_ip_addresses = configs
        .map(|configs| {
            configs
                .iter()
                .filter_map(|config| {
                    config
                        .pointer("/properties/privateIPAddress")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();
    let public_ip_addresses = configs
        .map(|configs| {
            configs
                .iter()
                .filter_map(|config| {
                    config
                        .pointer("/properties/publicIPAddress/id")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    NetworkInterface {
        id: str_field(body, "id").unwrap_or_default(),
        name: str_field(body, "name").unwrap_or_default(),
        private_ip_addresses,
        public_ip_addresses,
    }
}

fn virtual_machine_from_wire(body: &JsonValue) -> Option<VirtualMachine> {
    Some(VirtualMachine {
        id: str_field(body, "id")?,
        name: str_field(body, "name")?,
        location: str_field(body, "location").unwrap_or_default(),
        vm_size: body
            .pointer("/properties/hardwareProfile/vmSize")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        os_type: body
            .pointer("/properties/storageProfile/osDisk/osType")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        power_state: None,
    })
}

fn virtual_network_from_wire(body: &JsonValue) -> Option<VirtualNetwork> {
    let peerings = body
        .pointer("/properties/virtualNetworkPeerings")
        .and_then(JsonValue::as_array)
        .map(|peerings| {
            peerings
                .iter()
                .filter_map(|peering| {
                    Some(PeeringRecord {
                        id: str_field(peering, "id"),
                        name: str_field(peering, "name")?,
                        remote_vnet_id: peering
                            .pointer("/properties/remoteVirtualNetwork/id")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string),
                        peering_state: peering
                            .pointer("/properties/peeringState")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string),
                        provisioning_state: peering
                            .pointer("/properties/provisioningState")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string),
                        allow_virtual_network_access: peering
                            .pointer("/properties/allowVirtualNetworkAccess")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(true),
                        allow_forwarded_traffic: peering
                            .pointer("/properties/allowForwardedTraffic")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(false),
                        allow_gateway_transit: peering
                            .pointer("/properties/allowGatewayTransit")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(false),
                        use_remote_gateways: peering
                            .pointer("/properties/useRemoteGateways")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let subnets = body
        .pointer("/properties/subnets")
        .and_then(JsonValue::as_array)
        .map(|subnets| {
            subnets
                .iter()
                .filter_map(|subnet| str_field(subnet, "id"))
                .collect()
        })
        .unwrap_or_default();

    Some(VirtualNetwork {
        id: str_field(body, "id")?,
        name: str_field(body, "name")?,
        location: str_field(body, "location"),
        address_space: body
            .pointer("/properties/addressSpace/addressPrefixes")
            .and_then(JsonValue::as_array)
            .map(|prefixes| {
                prefixes
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        subnets,
        peerings,
    })
}
