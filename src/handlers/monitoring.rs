//! Monitoring token issuance and the mlab-ns legacy compatibility surface
//! (component I): `/v2/platform/monitoring/{exp}/{svc}` and `/ndt`.

use crate::{
    error::AppError,
    handlers::{
        bearer_token,
        nearest::{materialize_urls, parse_latlon_header, select_targets, NearestParams, PickedTarget},
    },
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr};

/// End-to-end monitoring token issuance: skips geo and admission entirely,
/// returning a single target named by the verified claim's subject.
pub async fn monitoring_handler(
    State(state): State<AppState>,
    Path((experiment, service)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let claims = state
        .verifier
        .verify_monitoring(token)
        .map_err(|_| AppError::Unauthorized)?;
    let hostname = claims.sub;

    let service_key = format!("{experiment}/{service}");
    let entries = state.tracker.instances();
    let entry = entries.get(&hostname).ok_or(AppError::Locator)?;
    if !entry.eligible_for(&service_key) {
        return Err(AppError::Locator);
    }

    let target = PickedTarget {
        hostname: hostname.clone(),
        machine: entry.registration.machine.clone(),
        registration: entry.registration.clone(),
        metro_rank: 0,
        index: 0,
    };
    let urls = materialize_urls(&state.signer, &target, &service_key, &experiment, &HashMap::new(), false);

    let body = crate::handlers::nearest::NearestResponse {
        results: vec![crate::handlers::nearest::TargetResult {
            machine: target.machine,
            hostname: target.hostname,
            location: crate::handlers::nearest::Location {
                city: target.registration.city,
                country: target.registration.country,
            },
            urls,
        }],
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct MlabNsQuery {
    pub format: Option<String>,
    pub policy: Option<String>,
    pub metro: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Serialize)]
pub struct MlabNsResult {
    pub city: String,
    pub country: String,
    pub fqdn: String,
    pub ip: Vec<String>,
    pub site: String,
    pub url: String,
}

/// Transcodes a single nearest pick into the legacy mlab-ns response shape.
pub async fn mlabns_compat_handler(
    State(state): State<AppState>,
    Query(query): Query<MlabNsQuery>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(format) = &query.format {
        if format != "json" {
            return Err(AppError::UnsupportedOption(format!("format={format}")));
        }
    }
    if let Some(policy) = &query.policy {
        if policy != "geo" && policy != "metro" {
            return Err(AppError::UnsupportedOption(format!("policy={policy}")));
        }
        if policy == "metro" && query.metro.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::UnsupportedOption("metro required for policy=metro".to_string()));
        }
    }

    let sources = crate::geo::GeoSources {
        param_lat: query.lat,
        param_lon: query.lon,
        edge_city_latlon: parse_latlon_header(&headers, "x-locate-edge-city-latlon"),
        remote_ip: Some(remote.ip()),
        ..Default::default()
    };
    let location = crate::geo::resolve_client_location(&sources, &state.ip_db).ok_or(AppError::Geo)?;

    let params = NearestParams::default();
    let entries = state.tracker.instances();
    let mut rng = rand::thread_rng();
    let picked = match select_targets(
        &entries,
        &state.default_service,
        location.lat,
        location.lon,
        "",
        &params,
        &mut rng,
    ) {
        Ok(picked) => picked,
        Err(AppError::Locator) => Vec::new(),
        Err(_) => return Err(AppError::BadGateway),
    };

    let Some(target) = picked.into_iter().next() else {
        return Err(AppError::NoContent);
    };

    let Some(parsed) = crate::fleet::model::parse_hostname(&target.hostname) else {
        return Err(AppError::BadGateway);
    };

    let body = MlabNsResult {
        city: target.registration.city.clone(),
        country: target.registration.country.clone(),
        fqdn: target.hostname.clone(),
        ip: vec!["127.0.0.1".to_string(), "::1".to_string()],
        site: parsed.site,
        url: format!("https://{}/", target.hostname),
    };
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_is_rejected() {
        let query = MlabNsQuery {
            format: Some("bt".to_string()),
            policy: None,
            metro: None,
            lat: None,
            lon: None,
        };
        assert!(query.format.as_deref() != Some("json"));
    }
}
