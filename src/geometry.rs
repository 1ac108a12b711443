//! Distance and position predicates used by the clustering pass.
//!
//! All distances are planar (Euclidean) in map units; screen-space tolerances are
//! converted by dividing through the view resolution (map units per pixel).

use crate::cluster::Cluster;
use crate::types::Feature;
use geo::{Distance, Euclidean, Point};
use std::sync::Arc;

/// Euclidean distance between two points.
///
/// # Examples
///
/// ```rust
/// use featurecluster::geometry::distance;
/// use geo::Point;
///
/// assert_eq!(distance(&Point::new(0.0, 0.0), &Point::new(3.0, 4.0)), 5.0);
/// ```
pub fn distance(p1: &Point, p2: &Point) -> f64 {
    Euclidean.distance(*p1, *p2)
}

/// Map units per screen pixel for a view `extent_width` map units wide rendered into
/// `width_px` pixels. Degenerate viewports fall back to 1.0 so callers never divide by zero.
pub fn resolution(extent_width: f64, width_px: f64) -> f64 {
    let res = extent_width / width_px;
    if res.is_finite() && res > 0.0 {
        res
    } else {
        log::warn!(
            "Degenerate view resolution ({} / {}), using 1.0",
            extent_width,
            width_px
        );
        1.0
    }
}

/// Whether `point` is close enough to the cluster centroid to be absorbed.
///
/// True iff `distance(centroid, point) / resolution <= tolerance_px`.
pub fn within_cluster_distance(
    point: &Point,
    cluster: &Cluster,
    tolerance_px: f64,
    resolution: f64,
) -> bool {
    distance(&cluster.centroid(), point) / resolution <= tolerance_px
}

/// Whether every feature lies within `max_distance` of `reference`.
///
/// With a resolution the distance is measured in screen pixels, otherwise in map
/// units. Features without a usable location never count as "same position".
/// An empty slice is vacuously true.
pub fn have_same_position(
    features: &[Arc<Feature>],
    reference: &Point,
    max_distance: f64,
    resolution: Option<f64>,
) -> bool {
    features.iter().all(|feature| {
        let Some(location) = feature.location() else {
            return false;
        };
        let d = distance(&location, reference);
        let d = match resolution {
            Some(res) => d / res,
            None => d,
        };
        d <= max_distance
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn feature(x: f64, y: f64) -> Arc<Feature> {
        Arc::new(Feature::point(x, y, Map::new()))
    }

    #[test]
    fn test_distance() {
        let d = distance(&Point::new(1.0, 1.0), &Point::new(4.0, 5.0));
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_within_cluster_distance_uses_resolution() {
        let f = feature(0.0, 0.0);
        let cluster = Cluster::create(f, Point::new(0.0, 0.0), 1);
        // 10 map units at 2 units/px is 5 px
        assert!(within_cluster_distance(
            &Point::new(10.0, 0.0),
            &cluster,
            5.0,
            2.0
        ));
        assert!(!within_cluster_distance(
            &Point::new(10.5, 0.0),
            &cluster,
            5.0,
            2.0
        ));
    }

    #[test]
    fn test_have_same_position() {
        let features = vec![feature(0.0, 0.0), feature(0.5, 0.0), feature(0.0, 0.5)];
        let center = Point::new(0.0, 0.0);
        assert!(have_same_position(&features, &center, 1.0, None));
        assert!(!have_same_position(&features, &center, 0.4, None));
        // 0.5 map units at 0.1 units/px is 5 px
        assert!(have_same_position(&features, &center, 5.0, Some(0.1)));
        assert!(!have_same_position(&features, &center, 4.0, Some(0.1)));
    }

    #[test]
    fn test_have_same_position_rejects_missing_location() {
        let features = vec![feature(0.0, 0.0), Arc::new(Feature::new(None, Map::new()))];
        assert!(!have_same_position(
            &features,
            &Point::new(0.0, 0.0),
            10.0,
            None
        ));
    }

    #[test]
    fn test_resolution_fallback() {
        assert_eq!(resolution(100.0, 50.0), 2.0);
        assert_eq!(resolution(100.0, 0.0), 1.0);
        assert_eq!(resolution(0.0, 50.0), 1.0);
    }
}
