//! Static centroid tables backing the client-geo fallback chain.
//!
//! Non-exhaustive by design — these are the country/region pairs the test
//! fleet actually exercises, plus the handful of regions large fleets care
//! about. Extend as new constraints come in; there is no dynamic reload path
//! for this table (unlike the IP database in `ipdb`).

/// ISO 3166-1 alpha-2 country code -> (lat, lon) centroid.
pub fn country_centroid(country: &str) -> Option<(f64, f64)> {
    match country {
        "US" => Some((39.8283, -98.5795)),
        "IT" => Some((41.8719, 12.5674)),
        "GB" => Some((55.3781, -3.4360)),
        "DE" => Some((51.1657, 10.4515)),
        "FR" => Some((46.6034, 1.8883)),
        "CA" => Some((56.1304, -106.3468)),
        "AU" => Some((-25.2744, 133.7751)),
        "BR" => Some((-14.2350, -51.9253)),
        "JP" => Some((36.2048, 138.2529)),
        "IN" => Some((20.5937, 78.9629)),
        "ZA" => Some((-30.5595, 22.9375)),
        "NG" => Some((9.0820, 8.6753)),
        _ => None,
    }
}

/// A coarse `country-region` key (as injected by the edge, e.g.
/// `"US-NY"`) -> (lat, lon) centroid.
pub fn region_centroid(country_region: &str) -> Option<(f64, f64)> {
    match country_region {
        "US-NY" => Some((40.7128, -74.0060)),
        "US-CA" => Some((36.7783, -119.4179)),
        "US-TX" => Some((31.9686, -99.9018)),
        "US-IL" => Some((40.6331, -89.3985)),
        "US-WA" => Some((47.7511, -120.7401)),
        "US-MA" => Some((42.4072, -71.3824)),
        "US-VA" => Some((37.4316, -78.6569)),
        "GB-ENG" => Some((52.3555, -1.1743)),
        "DE-BE" => Some((52.5200, 13.4050)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_country_resolves() {
        assert!(country_centroid("US").is_some());
    }

    #[test]
    fn unknown_country_is_none() {
        assert!(country_centroid("ZZ").is_none());
    }

    #[test]
    fn known_region_resolves() {
        assert!(region_centroid("US-NY").is_some());
    }
}
