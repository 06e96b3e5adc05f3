//! Client-geo resolver (component F): an ordered fallback chain, first
//! success wins. Each rung annotates which method matched so the response
//! can carry `X-Locate-ClientLatLon-Method`.

use super::{ipdb::IpGeoDb, tables};
use std::net::IpAddr;

pub const SENTINEL_ZERO: (f64, f64) = (0.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoMethod {
    Params,
    RegionParam,
    EdgeCity,
    EdgeCountryRegion,
    EdgeCountry,
    IpDb,
}

impl GeoMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GeoMethod::Params => "params",
            GeoMethod::RegionParam => "region_param",
            GeoMethod::EdgeCity => "edge_city",
            GeoMethod::EdgeCountryRegion => "edge_country_region",
            GeoMethod::EdgeCountry => "edge_country",
            GeoMethod::IpDb => "ip_db",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClientLocation {
    pub lat: f64,
    pub lon: f64,
    pub method: GeoMethod,
}

/// The raw, untrusted inputs a request may carry. Every field is optional
/// because every rung of the chain is allowed to be absent.
#[derive(Debug, Default, Clone)]
pub struct GeoSources<'a> {
    pub param_lat: Option<f64>,
    pub param_lon: Option<f64>,
    pub param_region: Option<&'a str>,
    pub param_country: Option<&'a str>,
    pub param_strict: bool,
    pub edge_city_latlon: Option<(f64, f64)>,
    pub edge_country_region: Option<&'a str>,
    pub edge_country: Option<&'a str>,
    pub remote_ip: Option<IpAddr>,
}

fn finite_and_in_range(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Runs the client-geo fallback chain. `strict` (rung 2's `strict=true`) suppresses
/// the country fallback within rung 2 only — it does not affect the edge
/// rungs below it.
pub fn resolve_client_location(sources: &GeoSources<'_>, ip_db: &IpGeoDb) -> Option<ClientLocation> {
    // Rung 1: explicit lat/lon query params.
    if let (Some(lat), Some(lon)) = (sources.param_lat, sources.param_lon) {
        if finite_and_in_range(lat, lon) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::Params,
            });
        }
    }

    // Rung 2: region/country query param against static centroids.
    if let Some(region) = sources.param_region {
        if let Some((lat, lon)) = tables::region_centroid(region) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::RegionParam,
            });
        }
    }
    if !sources.param_strict {
        if let Some(country) = sources.param_country {
            if let Some((lat, lon)) = tables::country_centroid(country) {
                return Some(ClientLocation {
                    lat,
                    lon,
                    method: GeoMethod::RegionParam,
                });
            }
        }
    }

    // Rung 3: edge-injected city lat/lon header, rejecting the sentinel.
    if let Some((lat, lon)) = sources.edge_city_latlon {
        if (lat, lon) != SENTINEL_ZERO && finite_and_in_range(lat, lon) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::EdgeCity,
            });
        }
    }

    // Rung 4: edge-injected country-region header.
    if let Some(cr) = sources.edge_country_region {
        if let Some((lat, lon)) = tables::region_centroid(cr) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::EdgeCountryRegion,
            });
        }
    }

    // Rung 5: edge-injected country header.
    if let Some(country) = sources.edge_country {
        if let Some((lat, lon)) = tables::country_centroid(country) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::EdgeCountry,
            });
        }
    }

    // Rung 6: IP -> city database.
    if let Some(ip) = sources.remote_ip {
        if let Some((lat, lon)) = ip_db.lookup(ip) {
            return Some(ClientLocation {
                lat,
                lon,
                method: GeoMethod::IpDb,
            });
        }
    }

    None
}
