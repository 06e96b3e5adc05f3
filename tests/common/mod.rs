//! Shared test scaffolding: builds a full `AppState` + `Router` backed by
//! the in-memory `SharedStore`, so integration tests can drive the
//! assembled axum app in-process via `tower::ServiceExt::oneshot`.

use axum::{routing::get, Router};
use ed25519_dalek::SigningKey;
use locate::{
    fleet::{model::UrlTemplate, HeartbeatTracker, Health, Registration},
    fleet::model::InstanceType,
    geo::ipdb::IpGeoDb,
    handlers::{heartbeat, monitoring, nearest, siteinfo},
    ratelimit::{RateLimiter, SlidingWindowLimiter, WindowConfig},
    state::AppState,
    store::memory::MemoryStore,
    token::{TokenSigner, TokenVerifier},
};
use rand::rngs::OsRng;
use std::{collections::HashMap, sync::Arc, time::Duration};

pub fn registration(hostname: &str, site: &str, lat: f64, lon: f64, instance_type: InstanceType, service: &str) -> Registration {
    let mut services = HashMap::new();
    services.insert(
        service.to_string(),
        vec![UrlTemplate {
            scheme: "wss".to_string(),
            path: "/ndt/v7/download".to_string(),
            port: None,
        }],
    );
    Registration {
        hostname: hostname.to_string(),
        machine: hostname.split('.').next().unwrap_or(hostname).to_string(),
        experiment: "ndt".to_string(),
        service: service.to_string(),
        site: site.to_string(),
        metro: site[..3].to_uppercase(),
        city: "Test City".to_string(),
        country: "US".to_string(),
        continent: "NA".to_string(),
        project: "sandbox".to_string(),
        instance_type,
        uplink: "10g".to_string(),
        latitude: lat,
        longitude: lon,
        probability: 1.0,
        services,
    }
}

/// Builds an `AppState` with no fleet entries; call `register` to seed it.
pub fn build_state() -> AppState {
    let store = MemoryStore::new();
    let tracker = HeartbeatTracker::new(store.clone(), Duration::from_secs(30), Duration::from_secs(10));
    let rate_limiter = Arc::new(RateLimiter::new(
        vec![],
        SlidingWindowLimiter::new(store.clone()),
        WindowConfig {
            interval: Duration::from_secs(3600),
            max_events: 10_000,
        },
        WindowConfig {
            interval: Duration::from_secs(3600),
            max_events: 10_000,
        },
        HashMap::new(),
    ));
    let key = SigningKey::generate(&mut OsRng);
    let vk = key.verifying_key();
    let signer = Arc::new(TokenSigner::new("test-1", key));
    let verifier = Arc::new(TokenVerifier::new([("test-1".to_string(), vk)]));

    AppState {
        store,
        tracker,
        rate_limiter,
        signer,
        verifier,
        ip_db: Arc::new(IpGeoDb::new("/nonexistent/GeoLite2-City.mmdb")),
        prom_fuser: None,
        early_exit_clients: Arc::new(vec![]),
        default_service: Arc::new("ndt/ndt7".to_string()),
        heartbeat_read_deadline: Duration::from_secs(30),
    }
}

pub async fn register(state: &AppState, reg: Registration, score: f64) {
    let hostname = reg.hostname.clone();
    state.tracker.register_instance(reg).await.unwrap();
    state.tracker.update_health(&hostname, Health { score }).await.unwrap();
}

pub fn router(state: AppState) -> Router {
    Router::new()
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
        .route("/v2/siteinfo/registrations", get(siteinfo::registrations_handler))
        .route("/ready", get(siteinfo::ready_handler))
        .route("/live", get(siteinfo::live_handler))
        .route("/ndt", get(monitoring::mlabns_compat_handler))
        .with_state(state)
}
