//! Locate: geographic request-routing service for a fleet of measurement
//! servers. Wires together the tracker, rate limiter, token signer/verifier,
//! geo resolver, and Prometheus fuser behind an axum HTTP surface.

use axum::{routing::get, Router};
use locate::{
    config::Config,
    fleet::HeartbeatTracker,
    geo::ipdb::{self, IpGeoDb},
    handlers::{heartbeat, monitoring, nearest, siteinfo},
    metrics_registry,
    promfuse::PrometheusFuser,
    ratelimit::{AgentCronLimiter, RateLimiter, SlidingWindowLimiter, WindowConfig},
    state::{build_signer, build_verifier, AppState},
    store::{memory::MemoryStore, redis_store::RedisStore, SharedStore},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "locate=info,tower_http=info".into()))
        .json()
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("[locate] configuration error: {e}");
        std::process::exit(1);
    });

    metrics_registry::install();
    info!(bind_addr = %config.bind_addr, "locate starting");

    let store: Arc<dyn SharedStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "redis connection failed, falling back to in-memory store");
                MemoryStore::new()
            }
        },
        None => {
            warn!("no LOCATE_REDIS_URL configured; using in-memory shared store (single replica only)");
            MemoryStore::new()
        }
    };

    let tracker = HeartbeatTracker::new(
        store.clone(),
        Duration::from_secs(config.redis_key_expiry_secs),
        config.memorystore_export_period,
    );
    let import_loop = tracker.spawn_import_loop();

    let agents: Vec<AgentCronLimiter> = config
        .agent_limits
        .iter()
        .filter_map(|spec| {
            AgentCronLimiter::new(spec.agent.clone(), &spec.cron, Duration::from_secs(spec.duration_secs))
                .map_err(|e| error!(agent = %spec.agent, error = %e, "invalid agent cron expression, skipping"))
                .ok()
        })
        .collect();
    let tier_cfg = config
        .rate_limit_tiers
        .iter()
        .map(|(tier, spec)| {
            (
                *tier,
                WindowConfig {
                    interval: Duration::from_secs(spec.interval_secs),
                    max_events: spec.max_events,
                },
            )
        })
        .collect();
    let rate_limiter = Arc::new(RateLimiter::new(
        agents,
        SlidingWindowLimiter::new(store.clone()),
        WindowConfig {
            interval: Duration::from_secs(config.rate_limit_ip.interval_secs),
            max_events: config.rate_limit_ip.max_events,
        },
        WindowConfig {
            interval: Duration::from_secs(config.rate_limit_ipua.interval_secs),
            max_events: config.rate_limit_ipua.max_events,
        },
        tier_cfg,
    ));

    let signer = Arc::new(build_signer(&config));
    let verifier = Arc::new(build_verifier(&config));

    let ip_db = Arc::new(IpGeoDb::new(config.geoip_db_path.clone()));
    let ip_db_reload = ipdb::spawn_reload_loop(ip_db.clone(), Duration::from_secs(3600));

    let prom_fuser = match &config.prometheus_url {
        Some(url) => match PrometheusFuser::new(url, tracker.clone()) {
            Ok(fuser) => Some(Arc::new(fuser)),
            Err(e) => {
                error!(error = %e, "failed to build prometheus fuser, running without fusion");
                None
            }
        },
        None => None,
    };
    let prom_loop = prom_fuser
        .clone()
        .map(|fuser| fuser.spawn_periodic(config.prometheus_check_period));

    let state = AppState {
        store,
        tracker: tracker.clone(),
        rate_limiter,
        signer,
        verifier,
        ip_db,
        prom_fuser,
        early_exit_clients: Arc::new(config.early_exit_clients.clone()),
        default_service: Arc::new(config.default_service.clone()),
        heartbeat_read_deadline: config.heartbeat_read_deadline,
    };

    let app = Router::new()
        .route("/v2/nearest/:experiment/:service", get(nearest::nearest_handler))
        .route(
            "/v2/priority/nearest/:experiment/:service",
            get(nearest::priority_nearest_handler),
        )
        .route(
            "/v2/platform/monitoring/:experiment/:service",
            get(monitoring::monitoring_handler),
        )
        .route("/v2/platform/heartbeat", get(heartbeat::heartbeat_handler))
        .route("/v2/platform/heartbeat-jwt", get(heartbeat::heartbeat_jwt_handler))
        .route("/v2/platform/prometheus", get(siteinfo::prometheus_trigger_handler))
        .route("/v2/siteinfo/registrations", get(siteinfo::registrations_handler))
        .route("/ready", get(siteinfo::ready_handler))
        .route("/live", get(siteinfo::live_handler))
        .route("/ndt", get(monitoring::mlabns_compat_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap_or_else(|e| {
        eprintln!("[locate] failed to bind {}: {e}", config.bind_addr);
        std::process::exit(1);
    });
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            eprintln!("[locate] server error: {e}");
            std::process::exit(1);
        });

    import_loop.stop().await;
    ip_db_reload.abort();
    if let Some(handle) = prom_loop {
        handle.abort();
    }
    info!("locate stopped");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
}
