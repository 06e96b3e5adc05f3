//! Reloadable IP -> city lookup, the last rung of the client-geo chain.
//! Wraps a MaxMind-format city database as an "opaque, given an IP return
//! lat/lon" collaborator the resolver falls back to.

use std::{net::IpAddr, path::PathBuf, sync::RwLock};

use tracing::{info, warn};

pub struct IpGeoDb {
    path: PathBuf,
    reader: RwLock<Option<maxminddb::Reader<Vec<u8>>>>,
}

impl IpGeoDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let reader = maxminddb::Reader::open_readfile(&path)
            .map_err(|e| warn!(error = %e, path = %path.display(), "ip_geo_db_initial_load_failed"))
            .ok();
        Self {
            path,
            reader: RwLock::new(reader),
        }
    }

    /// Re-reads the database file from disk. Called periodically by a
    /// background task so a new MaxMind release can be dropped in place
    /// without a restart. On failure, the previous reader (if any) is kept.
    pub fn reload(&self) {
        match maxminddb::Reader::open_readfile(&self.path) {
            Ok(new_reader) => {
                *self.reader.write().unwrap() = Some(new_reader);
                info!(path = %self.path.display(), "ip_geo_db_reloaded");
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "ip_geo_db_reload_failed");
            }
        }
    }

    /// Looks up a city-level lat/lon for `ip`. Returns `None` when the
    /// database isn't loaded or the address isn't found.
    pub fn lookup(&self, ip: IpAddr) -> Option<(f64, f64)> {
        let guard = self.reader.read().unwrap();
        let reader = guard.as_ref()?;
        let city: maxminddb::geoip2::City = reader.lookup(ip).ok()??;
        let loc = city.location?;
        match (loc.latitude, loc.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Spawns the background reload loop. Returns the join handle so callers
/// can abort it on shutdown, matching the structured-concurrency approach
/// used for the heartbeat tracker's import loop.
pub fn spawn_reload_loop(
    db: std::sync::Arc<IpGeoDb>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            db.reload();
        }
    })
}
