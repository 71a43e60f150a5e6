#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use armproxy::error::ErrorKind;
use armproxy::provider::model::{NextHopType, RouteEntry, RouteOrigin};
use armproxy::topology::routes::{dedupe_routes, fallback_routes, RouteResolver};
use common::{nic, route};
use std::sync::Arc;
use support::mocks::{MockFailure, MockProvider};

fn resolver(provider: &MockProvider) -> RouteResolver {
    RouteResolver::new(Arc::new(provider.clone()))
}

#[test]
fn dedupe_keeps_the_first_occurrence() {
    let mut second = route("10.0.0.0/24", NextHopType::VnetLocal);
    second.origin = RouteOrigin::User;
    let routes = vec![
        route("10.0.0.0/24", NextHopType::VnetLocal),
        second,
        route("10.0.0.0/24", NextHopType::VirtualNetworkGateway),
    ];
    let deduped = dedupe_routes(routes);
    // Same prefix with a different next hop is a different key.
    assert_eq!(deduped.len(), 2);
    assert_eq!(deduped[0].origin, RouteOrigin::Unknown);
}

#[test]
fn next_hop_ip_is_part_of_the_key() {
    let mut via_a = route("0.0.0.0/0", NextHopType::VirtualAppliance);
    via_a.next_hop_ip = Some("10.0.0.7".to_string());
    let mut via_b = route("0.0.0.0/0", NextHopType::VirtualAppliance);
    via_b.next_hop_ip = Some("10.0.0.8".to_string());
    assert_eq!(dedupe_routes(vec![via_a, via_b]).len(), 2);
}

#[tokio::test]
async fn effective_route_api_wins_when_it_answers() {
    let provider = MockProvider::new();
    provider.set_effective_routes("nic-1", vec![route("10.0.0.0/24", NextHopType::VnetLocal)]);
    provider.set_interface_table_routes("nic-1", vec![route("0.0.0.0/0", NextHopType::Internet)]);

    let routes = resolver(&provider)
        .interface_routes("sub-1", "rg-1", &nic("nic-1", "rg-1", &["10.0.0.4"]))
        .await
        .unwrap();

    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].next_hop_type, NextHopType::VnetLocal);
    assert_eq!(provider.call_count("get_interface_route_table"), 0);
}

#[tokio::test]
async fn falls_through_to_the_subnet_route_table() {
    let provider = MockProvider::new();
    provider.fail_effective_routes("nic-1", MockFailure::NotFound);
    provider.set_interface_table_routes("nic-1", vec![route("10.1.0.0/16", NextHopType::VnetLocal)]);

    let routes = resolver(&provider)
        .interface_routes("sub-1", "rg-1", &nic("nic-1", "rg-1", &["10.0.0.4"]))
        .await
        .unwrap();

    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].address_prefix, "10.1.0.0/16");
}

#[tokio::test]
async fn degrades_to_implicit_defaults_when_every_source_fails() {
    let provider = MockProvider::new();
    provider.fail_effective_routes("nic-1", MockFailure::Transient);
    provider.fail_interface_table("nic-1", MockFailure::NotFound);

    let routes = resolver(&provider)
        .interface_routes("sub-1", "rg-1", &nic("nic-1", "rg-1", &["10.0.0.4"]))
        .await
        .unwrap();

    assert_eq!(routes, fallback_routes());
    assert_eq!(routes[0].next_hop_type, NextHopType::Internet);
    assert!(routes[1..]
        .iter()
        .all(|r| r.next_hop_type == NextHopType::VnetLocal));
}

#[tokio::test]
async fn empty_sources_also_degrade_to_defaults() {
    let provider = MockProvider::new();
    // Both sources answer, but with nothing.
    let routes = resolver(&provider)
        .interface_routes("sub-1", "rg-1", &nic("nic-1", "rg-1", &["10.0.0.4"]))
        .await
        .unwrap();
    assert_eq!(routes, fallback_routes());
}

#[tokio::test]
async fn unauthorized_propagates_instead_of_degrading() {
    let provider = MockProvider::new();
    provider.fail_effective_routes("nic-1", MockFailure::Unauthorized);

    let err = resolver(&provider)
        .interface_routes("sub-1", "rg-1", &nic("nic-1", "rg-1", &["10.0.0.4"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    // The chain stops at the credential failure.
    assert_eq!(provider.call_count("get_interface_route_table"), 0);
}

#[tokio::test]
async fn machine_route_set_uses_only_the_first_interface() {
    let provider = MockProvider::new();
    provider.set_effective_routes("nic-1", vec![route("10.0.0.0/24", NextHopType::VnetLocal)]);
    provider.set_effective_routes("nic-2", vec![route("0.0.0.0/0", NextHopType::Internet)]);

    let interfaces = vec![
        nic("nic-1", "rg-1", &["10.0.0.4"]),
        nic("nic-2", "rg-1", &["192.168.0.9"]),
    ];
    let set = resolver(&provider)
        .machine_route_set("sub-1", "rg-1", "vm1", &interfaces)
        .await
        .unwrap();

    assert_eq!(set.name, "vm1");
    assert_eq!(set.ips, ["10.0.0.4"]);
    assert_eq!(set.routes.len(), 1);
    assert_eq!(set.routes[0].next_hop_type, NextHopType::VnetLocal);
}

#[tokio::test]
async fn machine_without_interfaces_yields_an_empty_set() {
    let provider = MockProvider::new();
    let set = resolver(&provider)
        .machine_route_set("sub-1", "rg-1", "vm1", &[])
        .await
        .unwrap();
    assert!(set.ips.is_empty());
    assert!(set.routes.is_empty());
}

#[tokio::test]
async fn vm_routes_merge_and_dedupe_across_interfaces() {
    let provider = MockProvider::new();
    provider.set_effective_routes(
        "nic-1",
        vec![
            route("10.0.0.0/24", NextHopType::VnetLocal),
            route("0.0.0.0/0", NextHopType::Internet),
        ],
    );
    provider.set_effective_routes(
        "nic-2",
        vec![
            route("10.0.0.0/24", NextHopType::VnetLocal),
            route("172.16.0.0/12", NextHopType::VnetLocal),
        ],
    );

    let interfaces = vec![nic("nic-1", "rg-1", &["10.0.0.4"]), nic("nic-2", "rg-1", &["10.0.0.5"])];
    let routes = resolver(&provider)
        .resolve_vm_routes("sub-1", "rg-1", &interfaces)
        .await
        .unwrap();

    let prefixes: Vec<&str> = routes.iter().map(|r| r.address_prefix.as_str()).collect();
    assert_eq!(prefixes, ["10.0.0.0/24", "0.0.0.0/0", "172.16.0.0/12"]);
}

#[tokio::test]
async fn one_failing_interface_does_not_discard_the_others() {
    let provider = MockProvider::new();
    provider.fail_effective_routes("nic-1", MockFailure::Transient);
    provider.fail_interface_table("nic-1", MockFailure::Transient);
    provider.set_effective_routes("nic-2", vec![route("10.0.0.0/24", NextHopType::VnetLocal)]);

    let interfaces = vec![nic("nic-1", "rg-1", &["10.0.0.4"]), nic("nic-2", "rg-1", &["10.0.0.5"])];
    let routes = resolver(&provider)
        .resolve_vm_routes("sub-1", "rg-1", &interfaces)
        .await
        .unwrap();

    // nic-1 degraded to the implicit defaults, nic-2 answered; the merge
    // carries both after deduplication.
    let has_defaults = routes.iter().any(|r| r.address_prefix == "0.0.0.0/0");
    let has_nic2 = routes.iter().any(|r| r.address_prefix == "10.0.0.0/24");
    assert!(has_defaults);
    assert!(has_nic2);

    let routes_from_entries: Vec<RouteEntry> = routes;
    assert_eq!(
        dedupe_routes(routes_from_entries.clone()).len(),
        routes_from_entries.len(),
        "merged routes are already deduplicated"
    );
}
