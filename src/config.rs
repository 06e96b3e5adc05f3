//! Configuration: assembled from environment variables at startup. CLI flag
//! parsing and secret loading are out of scope here — whatever starts this
//! process is expected to have already resolved secrets to bytes and
//! passed them down via env.

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JwtAuthMode {
    Espv1,
    Direct,
    Insecure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentLimitSpec {
    pub agent: String,
    pub cron: String,
    /// Duration in seconds; `0` means "never limited".
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowSpec {
    pub interval_secs: u64,
    pub max_events: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

pub struct Config {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub prometheus_url: Option<String>,
    pub jwt_auth_mode: JwtAuthMode,
    pub jwt_jwks_url: Option<String>,
    pub early_exit_clients: Vec<String>,
    pub rate_limit_ip: WindowSpec,
    pub rate_limit_ipua: WindowSpec,
    pub rate_limit_tiers: HashMap<u8, WindowSpec>,
    pub agent_limits: Vec<AgentLimitSpec>,
    pub memorystore_export_period: Duration,
    pub prometheus_check_period: Duration,
    pub redis_key_expiry_secs: u64,
    pub heartbeat_read_deadline: Duration,
    pub locate_signing_key: SigningKey,
    pub locate_kid: String,
    pub monitoring_verify_keys: Vec<(String, VerifyingKey)>,
    pub geoip_db_path: String,
    pub default_service: String,
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_json<T: serde::de::DeserializeOwned>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = env_var_opt("PORT").and_then(|p| p.parse().ok()).unwrap_or(8080);
        let bind_addr = format!("0.0.0.0:{port}");

        let jwt_auth_mode = match env_var_opt("LOCATE_JWT_AUTH_MODE").as_deref() {
            Some("direct") => JwtAuthMode::Direct,
            Some("insecure") => JwtAuthMode::Insecure,
            _ => JwtAuthMode::Espv1,
        };

        let early_exit_clients: Vec<String> = env_json("LOCATE_EARLY_EXIT_CLIENTS", Vec::new())?;
        let rate_limit_ip: WindowSpec = env_json(
            "LOCATE_RATE_LIMIT_IP",
            WindowSpec {
                interval_secs: 60,
                max_events: 100,
            },
        )?;
        let rate_limit_ipua: WindowSpec = env_json(
            "LOCATE_RATE_LIMIT_IPUA",
            WindowSpec {
                interval_secs: 60,
                max_events: 20,
            },
        )?;
        let rate_limit_tiers_raw: HashMap<String, WindowSpec> = env_json("LOCATE_RATE_LIMIT_TIERS", HashMap::new())?;
        let rate_limit_tiers = rate_limit_tiers_raw
            .into_iter()
            .filter_map(|(k, v)| k.parse::<u8>().ok().map(|tier| (tier, v)))
            .collect();
        let agent_limits: Vec<AgentLimitSpec> = env_json("LOCATE_AGENT_LIMITS", Vec::new())?;

        let memorystore_export_period = Duration::from_secs(
            env_var_opt("LOCATE_MEMORYSTORE_EXPORT_PERIOD_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        );
        let prometheus_check_period = Duration::from_secs(
            env_var_opt("LOCATE_PROMETHEUS_CHECK_PERIOD_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        );
        let redis_key_expiry_secs = env_var_opt("LOCATE_REDIS_KEY_EXPIRY_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let heartbeat_read_deadline = Duration::from_secs(
            env_var_opt("LOCATE_HEARTBEAT_READ_DEADLINE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        let locate_signing_key = decode_signing_key(&env_var("LOCATE_SIGNING_KEY_B64")?)?;
        let locate_kid = env_var_opt("LOCATE_SIGNING_KID").unwrap_or_else(|| "locate-1".to_string());
        let monitoring_verify_keys = decode_verify_keys(&env_var("LOCATE_MONITORING_VERIFY_KEYS_B64")?)?;
        let geoip_db_path =
            env_var_opt("LOCATE_GEOIP_DB_PATH").unwrap_or_else(|| "/etc/locate/GeoLite2-City.mmdb".to_string());
        let default_service = env_var_opt("LOCATE_DEFAULT_SERVICE").unwrap_or_else(|| "ndt/ndt7".to_string());

        Ok(Self {
            bind_addr,
            redis_url: env_var_opt("LOCATE_REDIS_URL"),
            prometheus_url: env_var_opt("LOCATE_PROMETHEUS_URL"),
            jwt_auth_mode,
            jwt_jwks_url: env_var_opt("LOCATE_JWT_JWKS_URL"),
            early_exit_clients,
            rate_limit_ip,
            rate_limit_ipua,
            rate_limit_tiers,
            agent_limits,
            memorystore_export_period,
            prometheus_check_period,
            redis_key_expiry_secs,
            heartbeat_read_deadline,
            locate_signing_key,
            locate_kid,
            monitoring_verify_keys,
            geoip_db_path,
            default_service,
        })
    }
}

fn decode_signing_key(b64: &str) -> Result<SigningKey, ConfigError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| ConfigError::Invalid("LOCATE_SIGNING_KEY_B64".to_string(), e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ConfigError::Invalid("LOCATE_SIGNING_KEY_B64".to_string(), "expected 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Format: `kid1:base64key1,kid2:base64key2,...`.
fn decode_verify_keys(spec: &str) -> Result<Vec<(String, VerifyingKey)>, ConfigError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    spec.split(',')
        .map(|entry| {
            let (kid, b64) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::Invalid("LOCATE_MONITORING_VERIFY_KEYS_B64".to_string(), entry.to_string()))?;
            let bytes = STANDARD
                .decode(b64)
                .map_err(|e| ConfigError::Invalid("LOCATE_MONITORING_VERIFY_KEYS_B64".to_string(), e.to_string()))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| ConfigError::Invalid("LOCATE_MONITORING_VERIFY_KEYS_B64".to_string(), "expected 32 bytes".to_string()))?;
            let vk = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| ConfigError::Invalid("LOCATE_MONITORING_VERIFY_KEYS_B64".to_string(), e.to_string()))?;
            Ok((kid.to_string(), vk))
        })
        .collect()
}
