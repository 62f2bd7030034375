//! Decay, confidence, and blending formulas.
//!
//! Every similarity here is a half-life exponential: a signal at distance
//! `λ` from the query scores exactly 0.5, inside the queried region scores
//! 1.0, and decay continues smoothly past the half-life point. The blend
//! weights trade metadata against vector signal based on how much metadata
//! the collection actually carries versus how peaked the vector similarity
//! distribution is.

use lumo_core::types::{GeoBox, TimeRange};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Quantile the decay constant is solved for: the r-th ranked distance
/// maps to this similarity.
pub const HALF_LIFE_QUANTILE: f64 = 0.5;

/// Minimum similarity a record can still contribute; bounds how far the
/// metadata prefilter windows are widened beyond the queried region.
pub const MIN_EXPANSION_SIM: f64 = 0.01;

/// Guard against division by zero when a denominator can be exactly 0.
const EPSILON: f64 = 1e-6;

/// Blend weights `(w_m, w_v)` from metadata availability `a` and vector
/// confidence `r_v`: `w_m = a / (a + r_v)`, `w_v = 1 - w_m`.
pub fn blended_weights(a: f64, r_v: f64) -> (f64, f64) {
    let w_m = a / (a + r_v + EPSILON);
    (w_m, 1.0 - w_m)
}

/// How peaked the similarity distribution is: the gap between the top
/// similarity `s_1` and the r-th ranked `s_r`, relative to `s_1`,
/// clamped to [0, 1].
pub fn vector_confidence(s_1: f64, s_r: f64) -> f64 {
    ((s_1 - s_r) / (s_1 + EPSILON)).clamp(0.0, 1.0)
}

/// Exponential-decay similarity for a raw index distance `d` given the
/// best distance `d_1` and decay constant `tau`.
pub fn vector_similarity(tau: f64, d_1: f64, d: f64) -> f64 {
    ((d_1 - d) / tau).exp()
}

/// Decay constant such that the r-th ranked distance `d_r` maps to
/// [`HALF_LIFE_QUANTILE`].
pub fn constant_tau(d_1: f64, d_r: f64) -> f64 {
    (d_1 - d_r) / HALF_LIFE_QUANTILE.ln()
}

/// Ranking position used to anchor the decay constant: `2·sqrt(n)` rounded,
/// clamped to [10, 100], where `n` is the metadata candidate count.
pub fn target_ranking(n: usize) -> usize {
    ((2.0 * (n as f64).sqrt()).round() as usize).clamp(10, 100)
}

/// Half-life location similarity. `distance_km` is the distance to the
/// queried region (0 inside it); `lambda_km` is the half-life radius.
pub fn location_similarity(distance_km: f64, lambda_km: f64) -> f64 {
    if distance_km <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * distance_km / lambda_km).exp()
}

/// Half-life time similarity for a capture time `ts` against a requested
/// range: 1.0 inside, decaying with the day distance to the nearest edge.
pub fn time_similarity(ts: i64, range: &TimeRange, lambda_days: f64) -> f64 {
    if range.contains(ts) {
        return 1.0;
    }
    let delta_secs = if ts < range.start {
        range.start - ts
    } else {
        ts - range.end
    };
    let delta_days = delta_secs as f64 / 86_400.0;
    (-std::f64::consts::LN_2 * delta_days / lambda_days).exp()
}

/// Degree deltas bounding the region where `sim_l >= MIN_EXPANSION_SIM`,
/// used to widen a bounding-box prefilter. Longitude degrees shrink with
/// latitude, so the reference latitude matters.
pub fn max_query_distance(lambda_km: f64, ref_lat: f64) -> (f64, f64) {
    let distance_km = lambda_km * (1.0 / MIN_EXPANSION_SIM).log2();
    let delta_lat = distance_km / 111.32;
    let delta_lon = distance_km / (111.32 * ref_lat.to_radians().cos());
    (delta_lat, delta_lon)
}

/// Day span bounding the region where `sim_t >= MIN_EXPANSION_SIM`.
pub fn max_query_time_days(lambda_days: f64) -> f64 {
    lambda_days * (1.0 / MIN_EXPANSION_SIM).log2()
}

/// Great-circle distance between two points (degrees) in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance from a point to the nearest edge of a bounding box, 0 inside.
pub fn distance_to_bbox_km(lat: f64, lon: f64, bbox: &GeoBox) -> f64 {
    if bbox.contains(lat, lon) {
        return 0.0;
    }
    let clamped_lat = lat.clamp(bbox.min_lat, bbox.max_lat);
    let clamped_lon = lon.clamp(bbox.min_lon, bbox.max_lon);
    haversine_km(lat, lon, clamped_lat, clamped_lon)
}

/// Bounding-box radius approximated as half the diagonal distance.
pub fn bbox_radius_km(bbox: &GeoBox) -> f64 {
    haversine_km(bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_location_similarity_half_life() {
        // bbox radius 100 km -> half-life 50 km.
        let lambda = 50.0;
        assert_eq!(location_similarity(0.0, lambda), 1.0);
        assert!(approx(location_similarity(50.0, lambda), 0.5, 1e-12));
        assert!(approx(location_similarity(100.0, lambda), 0.25, 1e-12));
    }

    #[test]
    fn test_time_similarity_half_life() {
        let range = TimeRange::new(0, 86_400);
        assert_eq!(time_similarity(43_200, &range, 0.5), 1.0);
        // One half-life past the end edge.
        assert!(approx(time_similarity(86_400 + 43_200, &range, 0.5), 0.5, 1e-12));
        // Same distance before the start edge.
        assert!(approx(time_similarity(-43_200, &range, 0.5), 0.5, 1e-12));
    }

    #[test]
    fn test_blended_weights() {
        let (w_m, w_v) = blended_weights(0.8, 0.2);
        assert!(approx(w_m, 0.8, 1e-5));
        assert!(approx(w_v, 0.2, 1e-5));
        assert!(approx(w_m + w_v, 1.0, 1e-12));
    }

    #[test]
    fn test_vector_confidence_clamped() {
        assert!(approx(vector_confidence(1.0, 0.5), 0.5, 1e-5));
        // s_r above s_1 clamps to 0 rather than going negative.
        assert_eq!(vector_confidence(0.5, 1.0), 0.0);
        // Degenerate zero top score.
        assert_eq!(vector_confidence(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_target_ranking_clamped() {
        assert_eq!(target_ranking(0), 10);
        assert_eq!(target_ranking(4), 10);
        assert_eq!(target_ranking(100), 20);
        assert_eq!(target_ranking(1_000_000), 100);
    }

    #[test]
    fn test_constant_tau_solves_half_life() {
        let tau = constant_tau(0.1, 0.9);
        assert!(approx(vector_similarity(tau, 0.1, 0.9), 0.5, 1e-12));
        assert!(approx(vector_similarity(tau, 0.1, 0.1), 1.0, 1e-12));
    }

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_km(10.0, 20.0, 10.0, 20.0), 0.0);
        // One degree of longitude at the equator.
        let d = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!(approx(d, EARTH_RADIUS_KM * 1f64.to_radians(), 1e-6));
    }

    #[test]
    fn test_distance_to_bbox() {
        let bbox = GeoBox {
            min_lat: 0.0,
            max_lat: 1.0,
            min_lon: 0.0,
            max_lon: 1.0,
        };
        assert_eq!(distance_to_bbox_km(0.5, 0.5, &bbox), 0.0);
        // Directly north of the box: distance to the top edge.
        let d = distance_to_bbox_km(2.0, 0.5, &bbox);
        assert!(approx(d, haversine_km(2.0, 0.5, 1.0, 0.5), 1e-9));
    }

    #[test]
    fn test_expansion_windows() {
        let (dlat, dlon) = max_query_distance(50.0, 0.0);
        // 50 * log2(100) km on each axis at the equator.
        let km = 50.0 * 100f64.log2();
        assert!(approx(dlat, km / 111.32, 1e-9));
        assert!(approx(dlon, km / 111.32, 1e-9));
        // Longitude widens toward the poles.
        let (_, dlon60) = max_query_distance(50.0, 60.0);
        assert!(dlon60 > dlon * 1.9);

        assert!(approx(max_query_time_days(3.0), 3.0 * 100f64.log2(), 1e-9));
    }

    #[test]
    fn test_bbox_radius() {
        let bbox = GeoBox {
            min_lat: -1.0,
            max_lat: 1.0,
            min_lon: -1.0,
            max_lon: 1.0,
        };
        let radius = bbox_radius_km(&bbox);
        assert!(approx(radius, haversine_km(-1.0, -1.0, 1.0, 1.0) / 2.0, 1e-9));
    }
}
