//! Distance and selection math (component A) and the client-geo resolution
//! chain (component F).

pub mod ipdb;
pub mod resolver;
pub mod tables;

pub use resolver::{resolve_client_location, ClientLocation, GeoSources};

/// Mean Earth radius in km, as used by the original haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Half the Earth's circumference in km. Distances beyond this are nonsense
/// (there's no such thing as farther than halfway around a sphere) and are
/// used to discard bad coordinates.
pub const EARTH_HALF_CIRCUMFERENCE_KM: f64 = 20038.0;

/// Great-circle distance between two lat/lon pairs, in kilometers.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Picks an index in `[0, n)` from an exponential distribution with the given
/// rate, biased heavily towards 0. With `rate=6`, index 0 wins ~95% of the
/// time, index 1 ~5%, and higher indices only rarely — strong locality bias
/// while still spreading load across nearby candidates.
///
/// `sample` must be drawn from `(0, 1)` (exclusive on both ends); callers
/// supply it so the RNG stays pluggable and seedable for tests.
pub fn exp_pick(rate: f64, n: usize, sample: f64) -> usize {
    debug_assert!(n > 0);
    let idx = (-sample.ln() / rate).floor();
    // idx is >= 0 for any sample in (0, 1); clamp defensively against FP edge cases.
    let idx = if idx.is_finite() && idx >= 0.0 {
        idx as u64
    } else {
        0
    };
    (idx % n as u64) as usize
}

/// Doubles the raw distance for cross-border candidates, keeping clients
/// in-country when a same-country option exists without forbidding
/// cross-border selection outright. An empty or unknown (`"ZZ"`) client
/// country never biases.
pub fn biased_distance(client_country: &str, registration_country: &str, distance_km: f64) -> f64 {
    if client_country.is_empty() || client_country == "ZZ" || client_country == registration_country {
        distance_km
    } else {
        2.0 * distance_km
    }
}
