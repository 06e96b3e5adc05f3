//! Wires every component together into the `AppState` axum handlers share:
//! a `Clone`-able bundle of `Arc`s, no process-global mutable statics.

use crate::{
    config::Config,
    fleet::HeartbeatTracker,
    geo::ipdb::IpGeoDb,
    promfuse::PrometheusFuser,
    ratelimit::RateLimiter,
    store::SharedStore,
    token::{TokenSigner, TokenVerifier},
};
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SharedStore>,
    pub tracker: Arc<HeartbeatTracker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub signer: Arc<TokenSigner>,
    pub verifier: Arc<TokenVerifier>,
    pub ip_db: Arc<IpGeoDb>,
    pub prom_fuser: Option<Arc<PrometheusFuser>>,
    pub early_exit_clients: Arc<Vec<String>>,
    /// Default service identifier used by the mlab-ns compat surface
    /// when the legacy request omits one.
    pub default_service: Arc<String>,
    /// Idle timeout for a heartbeat stream's `socket.recv()`.
    pub heartbeat_read_deadline: Duration,
}

pub fn build_signer(config: &Config) -> TokenSigner {
    TokenSigner::new(config.locate_kid.clone(), config.locate_signing_key.clone())
}

pub fn build_verifier(config: &Config) -> TokenVerifier {
    // The Locate-issued tokens are self-verified with the same keypair used
    // to sign them (verifiers live on target measurement servers in
    // production; here we also keep a local copy so `/v2/priority/nearest`
    // can validate its own API-key-shaped bearer tokens).
    let mut keys = config.monitoring_verify_keys.clone();
    keys.push((config.locate_kid.clone(), config.locate_signing_key.verifying_key()));
    TokenVerifier::new(keys)
}
