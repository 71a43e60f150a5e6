use crate::app_state::AppState;
use crate::cache;
use crate::config::ProxyConfig;
use crate::error::{Context, Result};
use crate::facade::http_server::FacadeServer;
use crate::limiter::ConcurrencyLimiter;
use crate::provider::rest::RestProvider;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

pub struct ProxyApp {
    state: AppState,
    facade: FacadeServer,
    drain_timeout: Duration,
    shutdown: tokio_util::sync::CancellationToken,
}

impl ProxyApp {
    pub fn initialise(config: ProxyConfig) -> Result<Self> {
        let limiter = ConcurrencyLimiter::new(config.limits.max_concurrent);
        let retry = RetryPolicy::from_config(&config.retry);
        let provider = Arc::new(RestProvider::new(
            &config.upstream,
            limiter.clone(),
            retry,
        )?);
        let cache = cache::from_config(&config.cache)?;
        let cache_ttl = config.cache.ttl()?;

        let facade = FacadeServer::build(&config.server.host, config.server.port)?;
        let shutdown = tokio_util::sync::CancellationToken::new();

        if config.upstream.access_token.is_none() {
            warn!("no upstream access token configured, provider calls will be unauthenticated");
        }

        Ok(Self {
            state: AppState {
                provider,
                cache,
                limiter,
                cache_ttl,
            },
            facade,
            drain_timeout: config.server.drain_timeout(),
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            facade,
            drain_timeout,
            shutdown,
        } = self;

        let mut facade_task = {
            let facade_state = state.clone();
            let facade_shutdown = shutdown.clone();
            tokio::spawn(async move { facade.serve(facade_state, facade_shutdown).await })
        };

        tokio::select! {
            res = &mut facade_task => {
                warn!("facade server task terminated unexpectedly");
                return match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err),
                    Err(join_err) => Err(crate::err!("facade task join error: {join_err}")),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }

        shutdown.cancel();

        match timeout(drain_timeout, &mut facade_task).await {
            Ok(res) => res
                .context("facade task join error")?
                .context("facade server failed during drain")?,
            Err(_) => {
                warn!("facade did not drain in time, aborting");
                facade_task.abort();
            }
        }

        Ok(())
    }
}
