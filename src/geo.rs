//! Great-circle distance helpers.

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers between two points given in signed
/// decimal degrees.
///
/// Coordinates are not range-checked; NaN inputs propagate to the result.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Arithmetic mean of the given distances, `None` when empty.
#[must_use]
pub fn mean_km(distances: &[f64]) -> Option<f64> {
    if distances.is_empty() {
        return None;
    }
    Some(distances.iter().sum::<f64>() / distances.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_distance_same_point_is_zero() {
        assert_eq!(distance_km(40.7128, -74.0060, 40.7128, -74.0060), 0.0);
        assert_eq!(distance_km(0.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let points = [
            (40.7128, -74.0060),
            (51.5074, -0.1278),
            (-33.8688, 151.2093),
            (35.6762, 139.6503),
            (0.0, 179.9),
            (0.0, -179.9),
        ];

        for &(lat_a, lon_a) in &points {
            for &(lat_b, lon_b) in &points {
                let ab = distance_km(lat_a, lon_a, lat_b, lon_b);
                let ba = distance_km(lat_b, lon_b, lat_a, lon_a);
                assert!((ab - ba).abs() < EPSILON, "{ab} != {ba}");
            }
        }
    }

    #[test]
    fn test_distance_new_york_to_london() {
        let d = distance_km(40.7128, -74.0060, 51.5074, -0.1278);
        assert!((d - 5570.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        // One degree of latitude is ~111.19 km on a 6371 km sphere.
        let d = distance_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_distance_across_antimeridian() {
        let d = distance_km(0.0, 179.9, 0.0, -179.9);
        assert!(d < 25.0, "got {d}");
    }

    #[test]
    fn test_distance_nan_propagates() {
        assert!(distance_km(f64::NAN, 0.0, 0.0, 0.0).is_nan());
    }

    #[test]
    fn test_mean_km() {
        assert_eq!(mean_km(&[]), None);
        let mean = mean_km(&[1.2, 4.5, 9.9]).unwrap();
        assert_eq!(format!("{mean:.1}"), "5.2");
    }
}
