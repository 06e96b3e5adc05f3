//! Heartbeat tracker (component D): owns the fleet map, mirrors it to the
//! shared store, and runs the background import loop that reconciles
//! cross-replica state.
//!
//! Concurrency: a single reader-writer lock guards the local map;
//! the lock is never held across a store round-trip.

use crate::fleet::model::{Health, HeartbeatEntry, PrometheusOverride, Registration};
use crate::store::SharedStore;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("no registration exists for host {0}")]
    NotRegistered(String),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub struct HeartbeatTracker {
    store: Arc<dyn SharedStore>,
    local: RwLock<HashMap<String, HeartbeatEntry>>,
    ready: AtomicBool,
    entry_ttl: Duration,
    import_period: Duration,
}

impl HeartbeatTracker {
    /// `entry_ttl` is the store-side TTL refreshed on every registration and
    /// health write (`Config::redis_key_expiry_secs`); `import_period` paces
    /// the background reconciliation loop (`Config::memorystore_export_period`).
    pub fn new(store: Arc<dyn SharedStore>, entry_ttl: Duration, import_period: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            local: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            entry_ttl,
            import_period,
        })
    }

    pub async fn register_instance(&self, registration: Registration) -> Result<(), TrackerError> {
        let json = serde_json::to_string(&registration).map_err(|e| {
            TrackerError::Store(crate::store::StoreError::Unavailable(e.to_string()))
        })?;
        self.store
            .put_registration(&registration.hostname, &json, self.entry_ttl)
            .await?;

        let mut local = self.local.write().unwrap();
        let entry = local
            .entry(registration.hostname.clone())
            .or_insert_with(|| HeartbeatEntry {
                registration: registration.clone(),
                health: Health { score: 0.0 },
                prometheus: None,
            });
        entry.registration = registration;
        Ok(())
    }

    pub async fn update_health(&self, hostname: &str, health: Health) -> Result<(), TrackerError> {
        {
            let local = self.local.read().unwrap();
            if !local.contains_key(hostname) {
                return Err(TrackerError::NotRegistered(hostname.to_string()));
            }
        }
        let json = serde_json::to_string(&health)
            .map_err(|e| TrackerError::Store(crate::store::StoreError::Unavailable(e.to_string())))?;
        self.store.put_health(hostname, &json, self.entry_ttl).await?;

        let mut local = self.local.write().unwrap();
        if let Some(entry) = local.get_mut(hostname) {
            entry.health = health;
        } else {
            return Err(TrackerError::NotRegistered(hostname.to_string()));
        }
        Ok(())
    }

    /// Composes a `PrometheusOverride` for every local entry that has a
    /// signal from either map, writing it to the store
    /// without refreshing TTL and to the local map.
    pub async fn update_prometheus(
        &self,
        host_health: &HashMap<String, bool>,
        machine_health: &HashMap<String, bool>,
    ) -> Result<(), TrackerError> {
        let targets: Vec<(String, Option<bool>, Option<bool>)> = {
            let local = self.local.read().unwrap();
            local
                .values()
                .filter_map(|entry| {
                    let fqdn = &entry.registration.hostname;
                    let machine = &entry.registration.machine;
                    let host = host_health.get(fqdn).copied();
                    let mach = machine_health.get(machine).copied();
                    if host.is_none() && mach.is_none() {
                        None
                    } else {
                        Some((fqdn.clone(), host, mach))
                    }
                })
                .collect()
        };

        for (hostname, host, mach) in targets {
            let healthy = host.unwrap_or(true) && mach.unwrap_or(true);
            let override_ = PrometheusOverride { healthy };
            let json = serde_json::to_string(&override_)
                .map_err(|e| TrackerError::Store(crate::store::StoreError::Unavailable(e.to_string())))?;
            self.store.put_prometheus(&hostname, &json).await?;

            let mut local = self.local.write().unwrap();
            if let Some(entry) = local.get_mut(&hostname) {
                entry.prometheus = Some(override_);
            }
        }
        Ok(())
    }

    pub fn instances(&self) -> HashMap<String, HeartbeatEntry> {
        self.local.read().unwrap().clone()
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Rebuilds the local map from the store: `SCAN` all keys, `HGETALL`
    /// each, parse. All-or-nothing — on partial failure the previous map is
    /// kept untouched.
    async fn import_once(&self) -> Result<(), TrackerError> {
        let hostnames = self.store.scan_hostnames().await?;
        let mut rebuilt = HashMap::with_capacity(hostnames.len());

        for hostname in hostnames {
            let fields = self.store.get_entry(&hostname).await?;
            let Some(registration_json) = fields.registration else {
                continue;
            };
            let registration: Registration = match serde_json::from_str(&registration_json) {
                Ok(r) => r,
                Err(e) => {
                    warn!(hostname = %hostname, error = %e, "import_skip_unparseable_registration");
                    continue;
                }
            };
            let health: Health = fields
                .health
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Health { score: 0.0 });
            let prometheus: Option<PrometheusOverride> =
                fields.prometheus.as_deref().and_then(|s| serde_json::from_str(s).ok());

            rebuilt.insert(
                hostname,
                HeartbeatEntry {
                    registration,
                    health,
                    prometheus,
                },
            );
        }

        *self.local.write().unwrap() = rebuilt;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Spawns the ~10s import loop, returning a handle that stops it
    /// when dropped or sent on. Call `stop_import` on shutdown.
    pub fn spawn_import_loop(self: &Arc<Self>) -> ImportLoopHandle {
        let tracker = Arc::clone(self);
        let import_period = self.import_period;
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(import_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = tracker.import_once().await {
                            warn!(error = %e, "import_tick_failed_keeping_previous_map");
                        } else {
                            info!(instances = tracker.instances().len(), "import_tick_ok");
                        }
                    }
                    _ = stop_rx.recv() => {
                        info!("import_loop_stopping");
                        break;
                    }
                }
            }
        });
        ImportLoopHandle { stop_tx, handle }
    }
}

pub struct ImportLoopHandle {
    stop_tx: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl ImportLoopHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::model::{InstanceType, UrlTemplate};
    use crate::store::memory::MemoryStore;
    use std::collections::HashMap as Map;

    fn sample_registration(hostname: &str) -> Registration {
        let mut services = Map::new();
        services.insert(
            "ndt/ndt7".to_string(),
            vec![UrlTemplate {
                scheme: "wss".to_string(),
                path: "/ndt/v7/download".to_string(),
                port: None,
            }],
        );
        Registration {
            hostname: hostname.to_string(),
            machine: "mlab1".to_string(),
            experiment: "ndt".to_string(),
            service: "ndt/ndt7".to_string(),
            site: "lga00".to_string(),
            metro: "LGA".to_string(),
            city: "New York_NY".to_string(),
            country: "US".to_string(),
            continent: "NA".to_string(),
            project: "sandbox".to_string(),
            instance_type: InstanceType::Physical,
            uplink: "10g".to_string(),
            latitude: 40.77,
            longitude: -73.87,
            probability: 1.0,
            services,
        }
    }

    #[tokio::test]
    async fn register_then_health_reflects_latest_of_both() {
        let store = MemoryStore::new();
        let tracker = HeartbeatTracker::new(store, Duration::from_secs(30), Duration::from_secs(10));
        let host = "mlab1-lga00.mlab-sandbox.measurement-lab.org";
        tracker.register_instance(sample_registration(host)).await.unwrap();
        tracker.update_health(host, Health { score: 0.5 }).await.unwrap();

        let instances = tracker.instances();
        let entry = instances.get(host).unwrap();
        assert_eq!(entry.health.score, 0.5);
        assert_eq!(entry.registration.site, "lga00");
    }

    #[tokio::test]
    async fn health_without_registration_errors() {
        let store = MemoryStore::new();
        let tracker = HeartbeatTracker::new(store, Duration::from_secs(30), Duration::from_secs(10));
        let err = tracker.update_health("nope.org", Health { score: 1.0 }).await;
        assert!(matches!(err, Err(TrackerError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn prometheus_override_vetoes_health() {
        let store = MemoryStore::new();
        let tracker = HeartbeatTracker::new(store, Duration::from_secs(30), Duration::from_secs(10));
        let host = "mlab1-lga00.mlab-sandbox.measurement-lab.org";
        tracker.register_instance(sample_registration(host)).await.unwrap();
        tracker.update_health(host, Health { score: 1.0 }).await.unwrap();

        let mut host_health = Map::new();
        host_health.insert(host.to_string(), false);
        tracker.update_prometheus(&host_health, &Map::new()).await.unwrap();

        let instances = tracker.instances();
        let entry = instances.get(host).unwrap();
        assert!(!entry.eligible_for("ndt/ndt7"));
    }

    #[tokio::test]
    async fn import_loop_populates_from_store() {
        let store = MemoryStore::new();
        let host = "mlab1-lga00.mlab-sandbox.measurement-lab.org";
        let json = serde_json::to_string(&sample_registration(host)).unwrap();
        store.put_registration(host, &json, Duration::from_secs(30)).await.unwrap();

        let tracker = HeartbeatTracker::new(store, Duration::from_secs(30), Duration::from_secs(10));
        assert!(!tracker.ready());
        tracker.import_once().await.unwrap();
        assert!(tracker.ready());
        assert!(tracker.instances().contains_key(host));
    }
}
