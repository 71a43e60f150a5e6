use crate::cache::Cache;
use crate::limiter::ConcurrencyLimiter;
use crate::peering::reconciler::PeeringReconciler;
use crate::provider::NetworkProvider;
use crate::topology::routes::RouteResolver;
use std::sync::Arc;
use std::time::Duration;

/// Shared state handed to facade handlers. The provider, cache, and limiter
/// are constructed once at process start and injected; there are no global
/// singletons behind them.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn NetworkProvider>,
    pub cache: Arc<dyn Cache>,
    pub limiter: ConcurrencyLimiter,
    pub cache_ttl: Duration,
}

impl AppState {
    pub fn route_resolver(&self) -> RouteResolver {
        RouteResolver::new(Arc::clone(&self.provider))
    }

    pub fn reconciler(&self) -> PeeringReconciler {
        PeeringReconciler::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.cache),
            self.cache_ttl,
        )
    }
}
