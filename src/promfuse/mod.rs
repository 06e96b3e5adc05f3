//! Prometheus fuser (component E): periodically (or on-demand) evaluates
//! two PromQL-like metrics against an upstream Prometheus server and turns
//! them into per-host `PrometheusOverride`s via `fleet::tracker`.

use crate::fleet::HeartbeatTracker;
use prometheus_http_query::Client;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{info, warn};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum PromFuseError {
    #[error("prometheus client error: {0}")]
    Client(String),
}

pub struct PrometheusFuser {
    client: Client,
    tracker: Arc<HeartbeatTracker>,
}

impl PrometheusFuser {
    pub fn new(base_url: &str, tracker: Arc<HeartbeatTracker>) -> Result<Self, PromFuseError> {
        let client = Client::try_from(base_url).map_err(|e| PromFuseError::Client(e.to_string()))?;
        Ok(Self { client, tracker })
    }

    /// `script_success{fqdn}`: a host is "healthy" iff the value != 0.
    async fn query_script_success(&self) -> Result<HashMap<String, bool>, PromFuseError> {
        let response = tokio::time::timeout(QUERY_TIMEOUT, self.client.query("script_success").get())
            .await
            .map_err(|_| PromFuseError::Client("timed out".to_string()))?
            .map_err(|e| PromFuseError::Client(e.to_string()))?;

        let mut out = HashMap::new();
        if let Some(vector) = response.data().as_vector() {
            for sample in vector {
                if let Some(fqdn) = sample.metric().get("fqdn") {
                    out.insert(fqdn.clone(), sample.sample().value() != 0.0);
                }
            }
        }
        Ok(out)
    }

    /// `gmx_machine_maintenance{machine}`: a machine is "healthy" iff the
    /// value == 0 (nonzero means "under maintenance").
    async fn query_machine_maintenance(&self) -> Result<HashMap<String, bool>, PromFuseError> {
        let response = tokio::time::timeout(
            QUERY_TIMEOUT,
            self.client.query("gmx_machine_maintenance").get(),
        )
        .await
        .map_err(|_| PromFuseError::Client("timed out".to_string()))?
        .map_err(|e| PromFuseError::Client(e.to_string()))?;

        let mut out = HashMap::new();
        if let Some(vector) = response.data().as_vector() {
            for sample in vector {
                if let Some(machine) = sample.metric().get("machine") {
                    out.insert(machine.clone(), sample.sample().value() == 0.0);
                }
            }
        }
        Ok(out)
    }

    /// Runs both queries and fuses the result into overrides for the whole
    /// fleet, applied via `HeartbeatTracker::update_prometheus`.
    pub async fn sweep(&self) -> Result<(), PromFuseError> {
        let host_health = self.query_script_success().await?;
        let machine_health = self.query_machine_maintenance().await?;
        self.tracker
            .update_prometheus(&host_health, &machine_health)
            .await
            .map_err(|e| PromFuseError::Client(e.to_string()))?;
        info!(
            hosts = host_health.len(),
            machines = machine_health.len(),
            "prometheus_sweep_complete"
        );
        Ok(())
    }

    /// A narrower sweep scoped to one hostname/machine pair, triggered on
    /// every received `Registration` so a freshly-joined host gets a
    /// prompt signal instead of waiting for the next periodic tick.
    pub async fn sweep_for_hostname(&self, hostname: &str, machine: &str) -> Result<(), PromFuseError> {
        let query = format!(r#"script_success{{fqdn="{hostname}"}}"#);
        let response = tokio::time::timeout(QUERY_TIMEOUT, self.client.query(&query).get())
            .await
            .map_err(|_| PromFuseError::Client("timed out".to_string()))?
            .map_err(|e| PromFuseError::Client(e.to_string()))?;
        let mut host_health = HashMap::new();
        if let Some(vector) = response.data().as_vector() {
            for sample in vector {
                if let Some(fqdn) = sample.metric().get("fqdn") {
                    host_health.insert(fqdn.clone(), sample.sample().value() != 0.0);
                }
            }
        }

        let query = format!(r#"gmx_machine_maintenance{{machine="{machine}"}}"#);
        let response = tokio::time::timeout(QUERY_TIMEOUT, self.client.query(&query).get())
            .await
            .map_err(|_| PromFuseError::Client("timed out".to_string()))?
            .map_err(|e| PromFuseError::Client(e.to_string()))?;
        let mut machine_health = HashMap::new();
        if let Some(vector) = response.data().as_vector() {
            for sample in vector {
                if let Some(m) = sample.metric().get("machine") {
                    machine_health.insert(m.clone(), sample.sample().value() == 0.0);
                }
            }
        }

        self.tracker
            .update_prometheus(&host_health, &machine_health)
            .await
            .map_err(|e| PromFuseError::Client(e.to_string()))
    }

    /// Spawns the periodic sweep loop.
    pub fn spawn_periodic(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "prometheus_sweep_failed");
                }
            }
        })
    }
}
