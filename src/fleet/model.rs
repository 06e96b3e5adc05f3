//! The data model: `Registration`, `Health`, `PrometheusOverride`,
//! `HeartbeatEntry`, and the derived, per-request `Site`/`Machine` shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Physical,
    Virtual,
}

/// A single URL template for a service, e.g. the download path for
/// `ndt/ndt7`. Materialized into a full URL at selection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTemplate {
    pub scheme: String,
    pub path: String,
    pub port: Option<u16>,
}

impl UrlTemplate {
    /// Builds the response map's template key, e.g. `"wss:///ndt/v7/download"`
    /// (no host — the key identifies the template, not a concrete target).
    pub fn template_key(&self) -> String {
        format!("{}://{}", self.scheme, self.path)
    }

    /// Substitutes `hostname` in for the host, appends `port` if set, and
    /// appends `query` as a `?`-prefixed query string (already
    /// percent-encoded by the caller).
    pub fn materialize(&self, hostname: &str, query: &str) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}?{}", self.scheme, hostname, port, self.path, query),
            None => format!("{}://{}{}?{}", self.scheme, hostname, self.path, query),
        }
    }
}

/// A snapshot of one measurement instance, as pushed on the heartbeat stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub hostname: String,
    pub machine: String,
    pub experiment: String,
    pub service: String,
    pub site: String,
    pub metro: String,
    pub city: String,
    pub country: String,
    pub continent: String,
    pub project: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub uplink: String,
    pub latitude: f64,
    pub longitude: f64,
    pub probability: f64,
    pub services: HashMap<String, Vec<UrlTemplate>>,
}

impl Registration {
    /// Derived from the hostname per the fleet naming convention; used by the authenticated
    /// heartbeat path and the priority endpoint's cross-org filter.
    pub fn org(&self) -> Option<String> {
        parse_hostname(&self.hostname).map(|p| p.org)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Health {
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrometheusOverride {
    pub healthy: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatEntry {
    pub registration: Registration,
    pub health: Health,
    pub prometheus: Option<PrometheusOverride>,
}

impl HeartbeatEntry {
    /// (I1): eligible iff the health score is positive, no Prometheus veto
    /// is in effect, and the requested service is one this instance serves.
    /// Parseability is handled upstream — entries that failed to parse never
    /// make it into the tracker's map.
    pub fn eligible_for(&self, service: &str) -> bool {
        self.health.score > 0.0
            && self.prometheus.map(|p| p.healthy).unwrap_or(true)
            && self.registration.services.contains_key(service)
    }
}

/// One measurement server's identity, as parsed out of its hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHostname {
    pub service_prefix: Option<String>,
    pub machine: String,
    pub site: String,
    pub org: String,
    pub project: String,
    pub domain: String,
}

/// Parses `[service-prefix-]<machine>-<site><seq>.<org>-<project>.<domain...>`,
/// e.g. `ndt-mlab1-lga00.mlab-sandbox.measurement-lab.org` or
/// `mlab1-lga00.mlab-sandbox.measurement-lab.org`.
pub fn parse_hostname(hostname: &str) -> Option<ParsedHostname> {
    let mut labels = hostname.split('.');
    let machine_label = labels.next()?;
    let org_label = labels.next()?;
    let domain: Vec<&str> = labels.collect();
    if domain.is_empty() {
        return None;
    }

    let machine_parts: Vec<&str> = machine_label.split('-').collect();
    let (service_prefix, machine, site) = match machine_parts.as_slice() {
        [prefix, machine, site] => (Some(prefix.to_string()), machine.to_string(), site.to_string()),
        [machine, site] => (None, machine.to_string(), site.to_string()),
        _ => return None,
    };

    let org_parts: Vec<&str> = org_label.splitn(2, '-').collect();
    let (org, project) = match org_parts.as_slice() {
        [org, project] => (org.to_string(), project.to_string()),
        _ => return None,
    };

    Some(ParsedHostname {
        service_prefix,
        machine,
        site,
        org,
        project,
        domain: domain.join("."),
    })
}

/// Metro derived from a site name when a registration doesn't carry its own
/// (GLOSSARY: "3-letter airport code grouping nearby sites"; sites are named
/// `<metro><seq>`).
pub fn metro_from_site(site: &str) -> String {
    site.chars().take(3).collect::<String>().to_uppercase()
}

/// Derived, ephemeral per-request grouping of same-site entries.
#[derive(Debug, Clone)]
pub struct Machine {
    pub hostname: String,
    pub machine: String,
    pub registration: Registration,
    pub health: Health,
}

#[derive(Debug, Clone)]
pub struct Site {
    pub site: String,
    pub distance_km: f64,
    pub machines: Vec<Machine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hostname_without_service_prefix() {
        let p = parse_hostname("mlab1-lga00.mlab-sandbox.measurement-lab.org").unwrap();
        assert_eq!(p.service_prefix, None);
        assert_eq!(p.machine, "mlab1");
        assert_eq!(p.site, "lga00");
        assert_eq!(p.org, "mlab");
        assert_eq!(p.project, "sandbox");
        assert_eq!(p.domain, "measurement-lab.org");
    }

    #[test]
    fn parses_hostname_with_service_prefix() {
        let p = parse_hostname("ndt-mlab1-lga00.mlab-sandbox.measurement-lab.org").unwrap();
        assert_eq!(p.service_prefix, Some("ndt".to_string()));
        assert_eq!(p.org, "mlab");
    }

    #[test]
    fn rejects_unparseable_hostname() {
        assert!(parse_hostname("not-a-fleet-host").is_none());
        assert!(parse_hostname("justonelabel").is_none());
    }

    #[test]
    fn metro_derivation() {
        assert_eq!(metro_from_site("lga00"), "LGA");
    }
}
