//! Nearest handler (component G): admission -> geo -> filter -> group ->
//! sort/rank -> pick -> URL materialization.

use crate::{
    error::AppError,
    fleet::model::{HeartbeatEntry, InstanceType, Machine, Registration, Site},
    geo::{biased_distance, exp_pick, haversine, EARTH_HALF_CIRCUMFERENCE_KM},
    handlers::bearer_token,
    state::AppState,
    token::TokenSigner,
};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr};

#[derive(Debug, Deserialize, Default)]
pub struct NearestParams {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub sites: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub strict: bool,
    pub org: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub region: Option<String>,
    #[serde(flatten)]
    pub client_params: HashMap<String, String>,
}

pub struct PickedTarget {
    pub hostname: String,
    pub machine: String,
    pub registration: Registration,
    pub metro_rank: usize,
    pub index: usize,
}

/// Filters, groups, sorts/ranks, and picks up to 4 targets — the pure core
/// of the selection pipeline, independent of axum/tokio so it's directly
/// unit testable and its RNG is fully pluggable.
pub fn select_targets(
    entries: &HashMap<String, HeartbeatEntry>,
    service: &str,
    client_lat: f64,
    client_lon: f64,
    client_country: &str,
    params: &NearestParams,
    rng: &mut impl Rng,
) -> Result<Vec<PickedTarget>, AppError> {
    let want_type = params.type_.as_deref().and_then(|t| match t {
        "physical" => Some(InstanceType::Physical),
        "virtual" => Some(InstanceType::Virtual),
        _ => None,
    });
    let want_sites: Option<Vec<&str>> = params.sites.as_deref().map(|s| s.split(',').collect());

    // Step 3: filter.
    let mut by_site: HashMap<String, Site> = HashMap::new();
    for entry in entries.values() {
        if !entry.eligible_for(service) {
            continue;
        }
        let reg = &entry.registration;

        if let Some(t) = want_type {
            if reg.instance_type != t {
                continue;
            }
        }
        if let Some(ref sites) = want_sites {
            if !sites.contains(&reg.site.as_str()) {
                continue;
            }
        }
        if let Some(ref country) = params.country {
            if params.strict && &reg.country != country {
                continue;
            }
        }
        if let Some(ref org) = params.org {
            if reg.org().as_deref() != Some(org.as_str()) {
                continue;
            }
        }

        let raw_distance = haversine(client_lat, client_lon, reg.latitude, reg.longitude);
        let distance = biased_distance(client_country, &reg.country, raw_distance);
        if distance > EARTH_HALF_CIRCUMFERENCE_KM {
            continue;
        }

        let site = by_site.entry(reg.site.clone()).or_insert_with(|| Site {
            site: reg.site.clone(),
            distance_km: distance,
            machines: Vec::new(),
        });
        site.machines.push(Machine {
            hostname: reg.hostname.clone(),
            machine: reg.machine.clone(),
            registration: reg.clone(),
            health: entry.health,
        });
    }

    // Step 4: per-site overload throttle.
    let keep_unconditionally = matches!(want_type, Some(InstanceType::Virtual)) || want_sites.is_some();
    let mut sites: Vec<Site> = by_site
        .into_values()
        .filter(|site| {
            keep_unconditionally || {
                let probability = site.machines[0].registration.probability;
                rng.gen::<f64>() < probability
            }
        })
        .collect();

    // Step 5: sort by distance, tie-break lexicographically by hostname;
    // compute site rank and first-appearance metro rank.
    sites.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| representative_hostname(a).cmp(representative_hostname(b)))
    });

    let mut metro_order: Vec<String> = Vec::new();
    let mut metro_rank_by_site: HashMap<String, usize> = HashMap::new();
    for site in &sites {
        let metro = &site.machines[0].registration.metro;
        let rank = match metro_order.iter().position(|m| m == metro) {
            Some(i) => i,
            None => {
                metro_order.push(metro.clone());
                metro_order.len() - 1
            }
        };
        metro_rank_by_site.insert(site.site.clone(), rank);
    }

    // Step 6: pick up to 4, never repeating a site.
    let mut remaining = sites;
    let mut picked = Vec::new();
    for index in 0..4 {
        if remaining.is_empty() {
            break;
        }
        let n = remaining.len();
        let sample = rng.gen_range(f64::EPSILON..1.0);
        let i = exp_pick(6.0, n, sample);
        let site = remaining.remove(i);
        let machine_idx = if site.machines.len() > 1 {
            rng.gen_range(0..site.machines.len())
        } else {
            0
        };
        let machine = &site.machines[machine_idx];
        picked.push(PickedTarget {
            hostname: machine.hostname.clone(),
            machine: machine.machine.clone(),
            registration: machine.registration.clone(),
            metro_rank: metro_rank_by_site[&site.site],
            index,
        });
    }

    if picked.is_empty() {
        return Err(AppError::Locator);
    }

    Ok(picked)
}

fn representative_hostname(site: &Site) -> &str {
    site.machines
        .iter()
        .map(|m| m.hostname.as_str())
        .min()
        .unwrap_or("")
}

#[derive(Serialize)]
pub struct NearestResponse {
    pub results: Vec<TargetResult>,
}

#[derive(Serialize)]
pub struct TargetResult {
    pub machine: String,
    pub hostname: String,
    pub location: Location,
    pub urls: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct Location {
    pub city: String,
    pub country: String,
}

/// Materializes every URL template for `target`'s requested service into a
/// fully signed URL.
pub fn materialize_urls(
    signer: &TokenSigner,
    target: &PickedTarget,
    service: &str,
    experiment: &str,
    client_params: &HashMap<String, String>,
    early_exit: bool,
) -> HashMap<String, String> {
    let mut urls = HashMap::new();
    let Some(templates) = target.registration.services.get(service) else {
        return urls;
    };
    for template in templates {
        let (token, _claims) = signer.sign("locate", experiment, &target.hostname);
        let mut query = vec![
            format!("access_token={token}"),
            "locate_version=v2".to_string(),
            format!("metro_rank={}", target.metro_rank),
            format!("index={}", target.index),
        ];
        if early_exit {
            query.push("early_exit=1".to_string());
        }
        for (k, v) in client_params {
            if let Some(suffix) = k.strip_prefix("client_") {
                query.push(format!("client_{suffix}={v}"));
            }
        }
        let url = template.materialize(&target.hostname, &query.join("&"));
        urls.insert(template.template_key(), url);
    }
    urls
}

pub async fn nearest_handler(
    State(state): State<AppState>,
    Path((experiment, service)): Path<(String, String)>,
    Query(params): Query<NearestParams>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, AppError> {
    let user_agent = user_agent_of(&headers);
    let ip = remote.ip().to_string();

    let now = chrono::Utc::now();
    let outcome = state.rate_limiter.check(now, &ip, &user_agent).await;
    metrics::counter!(crate::metrics_registry::names::RATE_LIMIT_OUTCOME, "outcome" => outcome.metric_label())
        .increment(1);
    if outcome.is_limited() {
        return Err(AppError::Admission);
    }

    build_nearest_response(&state, &experiment, &service, &params, &headers, remote, &user_agent).await
}

/// `/v2/priority/nearest/{exp}/{svc}`: the shared selection pipeline gated
/// by a bearer token's `tier` claim rather than the anonymous IP/UA limiter.
pub async fn priority_nearest_handler(
    State(state): State<AppState>,
    Path((experiment, service)): Path<(String, String)>,
    Query(params): Query<NearestParams>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Admission)?;
    let claims = state.verifier.verify(token).map_err(|_| AppError::Admission)?;
    if claims.aud != "locate" {
        return Err(AppError::Admission);
    }
    let org = claims.sub;
    let tier = claims.tier.unwrap_or(0);

    let now = chrono::Utc::now();
    let outcome = state
        .rate_limiter
        .check_tier(now, &org, &remote.ip().to_string(), tier)
        .await;
    metrics::counter!(crate::metrics_registry::names::RATE_LIMIT_OUTCOME, "outcome" => outcome.metric_label())
        .increment(1);
    if outcome.is_limited() {
        return Err(AppError::Admission);
    }

    let user_agent = user_agent_of(&headers);
    build_nearest_response(&state, &experiment, &service, &params, &headers, remote, &user_agent).await
}

fn user_agent_of(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn build_nearest_response(
    state: &AppState,
    experiment: &str,
    service: &str,
    params: &NearestParams,
    headers: &HeaderMap,
    remote: SocketAddr,
    user_agent: &str,
) -> Result<axum::response::Response, AppError> {
    let service_key = format!("{experiment}/{service}");

    let sources = crate::geo::GeoSources {
        param_lat: params.lat,
        param_lon: params.lon,
        param_region: params.region.as_deref(),
        param_country: params.country.as_deref(),
        param_strict: params.strict,
        edge_city_latlon: parse_latlon_header(headers, "x-locate-edge-city-latlon"),
        edge_country_region: headers
            .get("x-locate-edge-country-region")
            .and_then(|v| v.to_str().ok()),
        edge_country: headers.get("x-locate-edge-country").and_then(|v| v.to_str().ok()),
        remote_ip: Some(remote.ip()),
    };
    let location = crate::geo::resolve_client_location(&sources, &state.ip_db).ok_or(AppError::Geo)?;

    let client_country = sources.edge_country.unwrap_or_default();
    let entries = state.tracker.instances();
    let mut rng = rand::thread_rng();
    let picked = select_targets(
        &entries,
        &service_key,
        location.lat,
        location.lon,
        client_country,
        params,
        &mut rng,
    )?;

    let results: Vec<TargetResult> = picked
        .iter()
        .map(|target| {
            let early_exit = state.early_exit_clients.iter().any(|c| user_agent.contains(c.as_str()));
            TargetResult {
                machine: target.machine.clone(),
                hostname: target.hostname.clone(),
                location: Location {
                    city: target.registration.city.clone(),
                    country: target.registration.country.clone(),
                },
                urls: materialize_urls(
                    &state.signer,
                    target,
                    &service_key,
                    experiment,
                    &params.client_params,
                    early_exit,
                ),
            }
        })
        .collect();

    let mut response = Json(NearestResponse { results }).into_response();
    response.headers_mut().insert(
        "X-Locate-ClientLatLon",
        format!("{},{}", location.lat, location.lon).parse().unwrap(),
    );
    response
        .headers_mut()
        .insert("X-Locate-ClientLatLon-Method", location.method.as_str().parse().unwrap());
    Ok(response)
}

pub(crate) fn parse_latlon_header(headers: &HeaderMap, name: &str) -> Option<(f64, f64)> {
    let raw = headers.get(name)?.to_str().ok()?;
    let (lat, lon) = raw.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::model::{Health, PrometheusOverride, UrlTemplate};
    use rand::SeedableRng;

    fn registration(hostname: &str, site: &str, lat: f64, lon: f64, instance_type: InstanceType) -> Registration {
        let mut services = HashMap::new();
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

    fn entry(hostname: &str, site: &str, lat: f64, lon: f64, instance_type: InstanceType, score: f64) -> (String, HeartbeatEntry) {
        (
            hostname.to_string(),
            HeartbeatEntry {
                registration: registration(hostname, site, lat, lon, instance_type),
                health: Health { score },
                prometheus: None::<PrometheusOverride>,
            },
        )
    }

    #[test]
    fn two_site_fleet_returns_two_targets() {
        let entries: HashMap<_, _> = [
            entry(
                "mlab1-lga00.mlab-sandbox.measurement-lab.org",
                "lga00",
                40.77,
                -73.87,
                InstanceType::Virtual,
                1.0,
            ),
            entry(
                "mlab1-lax00.mlab-sandbox.measurement-lab.org",
                "lax00",
                33.94,
                -118.41,
                InstanceType::Physical,
                1.0,
            ),
        ]
        .into_iter()
        .collect();

        let params = NearestParams::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let picked = select_targets(&entries, "ndt/ndt7", 43.1988, -75.3242, "US", &params, &mut rng).unwrap();
        assert_eq!(picked.len(), 2);
        for target in &picked {
            assert!(target.hostname.contains("lga00") || target.hostname.contains("lax00"));
        }
    }

    #[test]
    fn virtual_filter_keeps_only_virtual_site() {
        let entries: HashMap<_, _> = [
            entry(
                "mlab1-lga00.mlab-sandbox.measurement-lab.org",
                "lga00",
                40.77,
                -73.87,
                InstanceType::Virtual,
                1.0,
            ),
            entry(
                "mlab1-lax00.mlab-sandbox.measurement-lab.org",
                "lax00",
                33.94,
                -118.41,
                InstanceType::Physical,
                1.0,
            ),
        ]
        .into_iter()
        .collect();

        let params = NearestParams {
            type_: Some("virtual".to_string()),
            ..Default::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let picked = select_targets(&entries, "ndt/ndt7", 43.1988, -75.3242, "US", &params, &mut rng).unwrap();
        assert_eq!(picked.len(), 1);
        assert!(picked[0].hostname.contains("lga00"));
    }

    #[test]
    fn strict_country_mismatch_yields_no_candidates() {
        let entries: HashMap<_, _> = [entry(
            "mlab1-lga00.mlab-sandbox.measurement-lab.org",
            "lga00",
            40.77,
            -73.87,
            InstanceType::Virtual,
            1.0,
        )]
        .into_iter()
        .collect();

        let params = NearestParams {
            country: Some("IT".to_string()),
            strict: true,
            ..Default::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let err = select_targets(&entries, "ndt/ndt7", 43.1988, -75.3242, "US", &params, &mut rng);
        assert!(matches!(err, Err(AppError::Locator)));
    }

    #[test]
    fn zero_score_instance_is_never_selected() {
        let entries: HashMap<_, _> = [entry(
            "mlab1-lga00.mlab-sandbox.measurement-lab.org",
            "lga00",
            40.77,
            -73.87,
            InstanceType::Virtual,
            0.0,
        )]
        .into_iter()
        .collect();
        let params = NearestParams::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let err = select_targets(&entries, "ndt/ndt7", 43.1988, -75.3242, "US", &params, &mut rng);
        assert!(matches!(err, Err(AppError::Locator)));
    }

    #[test]
    fn same_seed_yields_same_target_set() {
        let entries: HashMap<_, _> = [
            entry("mlab1-lga00.x-sandbox.measurement-lab.org", "lga00", 40.77, -73.87, InstanceType::Virtual, 1.0),
            entry("mlab1-ord01.x-sandbox.measurement-lab.org", "ord01", 41.97, -87.90, InstanceType::Virtual, 1.0),
            entry("mlab1-den02.x-sandbox.measurement-lab.org", "den02", 39.86, -104.67, InstanceType::Virtual, 1.0),
        ]
        .into_iter()
        .collect();
        let params = NearestParams::default();

        let mut rng_a = rand::rngs::StdRng::seed_from_u64(42);
        let a = select_targets(&entries, "ndt/ndt7", 40.0, -80.0, "US", &params, &mut rng_a).unwrap();
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(42);
        let b = select_targets(&entries, "ndt/ndt7", 40.0, -80.0, "US", &params, &mut rng_b).unwrap();

        let hosts_a: Vec<&str> = a.iter().map(|t| t.hostname.as_str()).collect();
        let hosts_b: Vec<&str> = b.iter().map(|t| t.hostname.as_str()).collect();
        assert_eq!(hosts_a, hosts_b);
    }
}
