#![forbid(unsafe_code)]

//! REST facade over the mirrored resource graph. Every endpoint serves from
//! the cache, falling back to the upstream provider on a miss; `refresh=true`
//! bypasses the cache for the request.

use crate::app_state::AppState;
use crate::cache::{cache_key, cached_fetch};
use crate::error::{Context, Error, ErrorKind, Result};
use crate::provider::model::VirtualMachineDetail;
use crate::telemetry::runtime_counters;
use axum::extract::{MatchedPath, Path, Query, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct FacadeServer {
    addr: SocketAddr,
}

impl FacadeServer {
    pub fn build(host: &str, port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;
        Ok(Self { addr })
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health/live", get(live))
            .route("/health/status", get(status_report))
            .route("/api/subscriptions", get(list_subscriptions))
            .route("/api/subscriptions/:sub/resource-groups", get(list_resource_groups))
            .route("/api/subscriptions/:sub/route-tables", get(list_route_tables))
            .route(
                "/api/subscriptions/:sub/resource-groups/:rg/route-tables/:name",
                get(get_route_table),
            )
            .route(
                "/api/subscriptions/:sub/resource-groups/:rg/virtual-machines",
                get(list_virtual_machines),
            )
            .route(
                "/api/subscriptions/:sub/resource-groups/:rg/virtual-machines/:name",
                get(get_virtual_machine),
            )
            .route("/api/subscriptions/:sub/virtual-networks", get(list_virtual_networks))
            .route(
                "/api/subscriptions/:sub/resource-groups/:rg/virtual-networks/:name",
                get(get_virtual_network),
            )
            .route("/api/subscriptions/:sub/peering-report", get(peering_report))
            .layer(middleware::from_fn(track_requests))
            .layer(Extension(state))
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind facade listener on {}", self.addr))?;

        info!("facade listening on {}", self.addr);

        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
            .context("facade server exited abnormally")?;

        Ok(())
    }
}

async fn track_requests(matched_path: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let route = matched_path
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    runtime_counters().record_http_request(&route, response.status().as_u16());
    response
}

/// Maps the crate's error kinds onto response codes: missing resources are
/// 404, credential failures 401, degraded upstream data 502, the rest 500.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Transient | ErrorKind::Parse => StatusCode::BAD_GATEWAY,
            ErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct ScopeQuery {
    resource_group: Option<String>,
    #[serde(default)]
    refresh: bool,
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status_report(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let counters = runtime_counters().snapshot();
    let limiter = state.limiter.snapshot();
    let upstream: Vec<_> = counters
        .upstream
        .iter()
        .map(|entry| {
            json!({
                "operation": entry.operation,
                "success": entry.success,
                "failure": entry.failure,
                "failures_by_kind": entry
                    .failures_by_kind
                    .iter()
                    .map(|(kind, count)| json!({ "kind": kind, "count": count }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    let http_requests: Vec<_> = counters
        .http_requests
        .iter()
        .map(|entry| {
            json!({
                "route": entry.route,
                "status_code": entry.status_code,
                "total": entry.total,
            })
        })
        .collect();

    Json(json!({
        "cache": {
            "hits": counters.cache_hits,
            "misses": counters.cache_misses,
            "entries": state.cache.len().await,
        },
        "limiter": {
            "limit": limiter.limit,
            "inflight": limiter.inflight,
            "throttled": limiter.throttled,
        },
        "upstream": upstream,
        "http_requests": http_requests,
    }))
}

async fn list_subscriptions(
    Extension(state): Extension<AppState>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let key = cache_key(&["subscriptions"]);
    let subscriptions = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.list_subscriptions().await },
    )
    .await?;
    Ok(Json(json!({ "subscriptions": subscriptions })))
}

async fn list_resource_groups(
    Extension(state): Extension<AppState>,
    Path(sub): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let key = cache_key(&["resource_groups", &sub]);
    let groups = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.list_resource_groups(&sub).await },
    )
    .await?;
    Ok(Json(json!({ "resource_groups": groups })))
}

async fn list_route_tables(
    Extension(state): Extension<AppState>,
    Path(sub): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let key = cache_key(&["route_tables", &sub]);
    let tables = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.list_route_tables(&sub).await },
    )
    .await?;
    Ok(Json(json!({ "route_tables": tables })))
}

async fn get_route_table(
    Extension(state): Extension<AppState>,
    Path((sub, rg, name)): Path<(String, String, String)>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let key = cache_key(&["route_table", &sub, &rg, &name]);
    let table = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.get_route_table(&sub, &rg, &name).await },
    )
    .await?;
    Ok(Json(serde_json::to_value(table).map_err(Error::from)?))
}

async fn list_virtual_machines(
    Extension(state): Extension<AppState>,
    Path((sub, rg)): Path<(String, String)>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let key = cache_key(&["virtual_machines", &sub, &rg]);
    let machines = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.list_virtual_machines(&sub, &rg).await },
    )
    .await?;
    Ok(Json(json!({ "virtual_machines": machines })))
}

async fn get_virtual_machine(
    Extension(state): Extension<AppState>,
    Path((sub, rg, name)): Path<(String, String, String)>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<VirtualMachineDetail> {
    let key = cache_key(&["virtual_machine", &sub, &rg, &name]);
    let detail = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async {
            let (machine, network_interfaces) =
                state.provider.get_virtual_machine(&sub, &rg, &name).await?;
            let effective_routes = state
                .route_resolver()
                .resolve_vm_routes(&sub, &rg, &network_interfaces)
                .await?;
            Ok(VirtualMachineDetail {
                machine,
                network_interfaces,
                effective_routes,
            })
        },
    )
    .await?;
    Ok(Json(detail))
}

async fn list_virtual_networks(
    Extension(state): Extension<AppState>,
    Path(sub): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<serde_json::Value> {
    let rg = query.resource_group.clone();
    let key = cache_key(&["virtual_networks", &sub, rg.as_deref().unwrap_or("")]);
    let networks = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async {
            state
                .provider
                .list_virtual_networks(&sub, rg.as_deref())
                .await
        },
    )
    .await?;
    Ok(Json(json!({ "virtual_networks": networks })))
}

async fn get_virtual_network(
    Extension(state): Extension<AppState>,
    Path((sub, rg, name)): Path<(String, String, String)>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<crate::provider::model::VirtualNetwork> {
    let key = cache_key(&["virtual_network", &sub, &rg, &name]);
    let network = cached_fetch(
        state.cache.as_ref(),
        &key,
        state.cache_ttl,
        query.refresh,
        || async { state.provider.get_virtual_network(&sub, &rg, &name).await },
    )
    .await?;
    Ok(Json(network))
}

async fn peering_report(
    Extension(state): Extension<AppState>,
    Path(sub): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<crate::peering::reconciler::PeeringReport> {
    let report = state
        .reconciler()
        .report(&sub, query.resource_group.as_deref(), query.refresh)
        .await?;
    Ok(Json(report))
}
