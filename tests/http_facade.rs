#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use armproxy::app_state::AppState;
use armproxy::cache::MemoryCache;
use armproxy::facade::http_server::FacadeServer;
use armproxy::limiter::ConcurrencyLimiter;
use armproxy::provider::model::{NetworkInterface, NextHopType, Subscription, VirtualMachine};
use common::{peering, route, vnet, vnet_id};
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::mocks::{MockFailure, MockProvider};

const SUB: &str = "sub-1";

async fn spawn_facade(provider: MockProvider) -> SocketAddr {
    let state = AppState {
        provider: Arc::new(provider),
        cache: Arc::new(MemoryCache::new(Duration::from_secs(300))),
        limiter: ConcurrencyLimiter::new(Some(4)),
        cache_ttl: Duration::from_secs(300),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");

    tokio::spawn(async move {
        axum::serve(listener, FacadeServer::router(state))
            .await
            .expect("facade serves");
    });

    addr
}

async fn get_json(addr: SocketAddr, path: &str) -> (reqwest::StatusCode, JsonValue) {
    let response = reqwest::get(format!("http://{addr}{path}"))
        .await
        .expect("request succeeds");
    let status = response.status();
    let body = response.json().await.expect("json body");
    (status, body)
}

#[tokio::test]
async fn liveness_endpoint_answers() {
    let addr = spawn_facade(MockProvider::new()).await;
    let (status, body) = get_json(addr, "/health/live").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn subscriptions_are_mirrored() {
    let provider = MockProvider::new();
    provider.add_subscription(Subscription {
        id: "/subscriptions/sub-1".to_string(),
        name: "sub-1".to_string(),
        display_name: Some("Production".to_string()),
        state: "Enabled".to_string(),
    });
    let addr = spawn_facade(provider).await;

    let (status, body) = get_json(addr, "/api/subscriptions").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["subscriptions"][0]["name"], "sub-1");
}

#[tokio::test]
async fn repeated_requests_are_served_from_the_cache() {
    let provider = MockProvider::new();
    let addr = spawn_facade(provider.clone()).await;

    let path = format!("/api/subscriptions/{SUB}/virtual-networks");
    get_json(addr, &path).await;
    get_json(addr, &path).await;
    assert_eq!(provider.call_count("list_virtual_networks"), 1);

    get_json(addr, &format!("{path}?refresh=true")).await;
    assert_eq!(provider.call_count("list_virtual_networks"), 2);
}

#[tokio::test]
async fn vm_detail_includes_merged_effective_routes() {
    let provider = MockProvider::new();
    provider.add_machine(
        VirtualMachine {
            id: format!("/subscriptions/{SUB}/resourceGroups/rg-1/providers/Microsoft.Compute/virtualMachines/vm1"),
            name: "vm1".to_string(),
            location: "westeurope".to_string(),
            vm_size: "Standard_D2s_v3".to_string(),
            os_type: Some("Linux".to_string()),
            power_state: None,
        },
        vec![NetworkInterface {
            id: format!("/subscriptions/{SUB}/resourceGroups/rg-1/providers/Microsoft.Network/networkInterfaces/nic-1"),
            name: "nic-1".to_string(),
            private_ip_addresses: vec!["10.0.0.4".to_string()],
            public_ip_addresses: Vec::new(),
        }],
    );
    provider.set_effective_routes(
        "nic-1",
        vec![
            route("10.0.0.0/24", NextHopType::VnetLocal),
            route("10.0.0.0/24", NextHopType::VnetLocal),
        ],
    );
    let addr = spawn_facade(provider).await;

    let (status, body) = get_json(
        addr,
        &format!("/api/subscriptions/{SUB}/resource-groups/rg-1/virtual-machines/vm1"),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["name"], "vm1");
    assert_eq!(body["network_interfaces"][0]["name"], "nic-1");
    let routes = body["effective_routes"].as_array().expect("routes array");
    assert_eq!(routes.len(), 1, "duplicate routes are merged");
}

#[tokio::test]
async fn peering_report_returns_pairs_and_summary() {
    let provider = MockProvider::new();
    let hub_id = vnet_id(SUB, "net-rg", "hub");
    let spoke_id = vnet_id(SUB, "net-rg", "spoke");
    provider.add_vnet(vnet(SUB, "net-rg", "hub", vec![peering("hub-to-spoke", &spoke_id, "Connected")]));
    provider.add_vnet(vnet(SUB, "net-rg", "spoke", vec![peering("spoke-to-hub", &hub_id, "Connected")]));
    let addr = spawn_facade(provider).await;

    let (status, body) = get_json(addr, &format!("/api/subscriptions/{SUB}/peering-report")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["summary"]["total"], 1);
    assert_eq!(body["summary"]["connected_count"], 1);
    assert_eq!(body["pairs"][0]["connected"], true);
}

#[tokio::test]
async fn missing_resources_map_to_not_found() {
    let addr = spawn_facade(MockProvider::new()).await;
    let (status, body) = get_json(
        addr,
        &format!("/api/subscriptions/{SUB}/resource-groups/rg-1/route-tables/absent"),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("absent"));
}

#[tokio::test]
async fn unauthorized_remote_failures_do_not_break_the_report() {
    let provider = MockProvider::new();
    let dark_id = vnet_id("other-sub", "their-rg", "dark");
    provider.add_vnet(vnet(SUB, "net-rg", "hub", vec![peering("hub-to-dark", &dark_id, "Connected")]));
    provider.fail_vnet("dark", MockFailure::Unauthorized);
    let addr = spawn_facade(provider).await;

    let (status, body) = get_json(addr, &format!("/api/subscriptions/{SUB}/peering-report")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["summary"]["partial_count"], 1);
    assert_eq!(body["pairs"][0]["vnet2_to_vnet1_state"], "Unknown");
}

#[tokio::test]
async fn status_endpoint_reports_cache_and_limiter_state() {
    let provider = MockProvider::new();
    let addr = spawn_facade(provider).await;

    get_json(addr, &format!("/api/subscriptions/{SUB}/virtual-networks")).await;
    let (status, body) = get_json(addr, "/health/status").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(body["cache"]["entries"].as_u64().unwrap() >= 1);
    assert_eq!(body["limiter"]["limit"], 4);
}
