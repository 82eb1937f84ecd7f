use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use gateway_core::auth::{CredentialValidator, TrustedKeys};
use gateway_core::config::Config;
use gateway_core::edge::{router, GatewayState};
use gateway_core::observability::{init_logging, GatewayMetrics};
use gateway_core::rate_limit::{Backend, RateLimitRules, RateLimiter, RedisCounters};
use gateway_core::shutdown::{run_with_graceful_shutdown, ShutdownCoordinator};
use gateway_core::socket::ConnectionHub;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(config.log_json);

    info!("starting gateway core service");

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(GatewayMetrics::new(&registry)?);

    let keys = Arc::new(TrustedKeys::hs256(&config.auth.hs256_secret));
    let validator = Arc::new(CredentialValidator::new(keys, &config.auth));

    let mut rules = RateLimitRules::with_default(config.rate_limit);
    rules.per_route = config.rate_limit_routes.clone();
    let limiter = match &config.redis_url {
        Some(url) => {
            let counters =
                RedisCounters::new(url.as_str(), config.rate_limit_store_timeout).await?;
            info!("rate limiter using distributed counters");
            Arc::new(RateLimiter::new(Backend::Distributed(counters), rules))
        }
        None => {
            warn!("no counter store configured, rate limiter running in-process");
            Arc::new(RateLimiter::local(rules))
        }
    };

    let hub = Arc::new(ConnectionHub::new(config.socket.clone(), metrics.clone()));

    let state = Arc::new(GatewayState {
        validator,
        limiter,
        hub: hub.clone(),
        metrics,
        registry,
        required_capability: None,
    });

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.spawn("liveness-sweeper", {
        let hub = hub.clone();
        let cancel = coordinator.cancel_token();
        async move { hub.run_sweeper(cancel).await }
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway core service listening");

    let cancel = coordinator.cancel_token();
    let server = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await });

    run_with_graceful_shutdown(server.into_future(), coordinator, config.shutdown_timeout).await;

    hub.shutdown_all().await;
    info!("gateway core service stopped");
    Ok(())
}
