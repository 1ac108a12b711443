//! Projection of clusters into renderable graphics.
//!
//! The projection is pure: it reads a cluster list and the view, and returns plain
//! values a host renderer can draw. Offsets are in screen pixels relative to the
//! cluster center; spiderfy leg ends are additionally given in map units.

use crate::cluster::Cluster;
use crate::config::LayoutConfig;
use crate::types::{Feature, LayerId, ViewState};
use geo::{Coord, Point, coord};
use std::f64::consts::PI;
use std::sync::Arc;

/// Marker sizes (px) of the five aggregate size classes, smallest first.
pub const SIZE_CLASSES: [f64; 5] = [25.0, 25.0, 75.0, 100.0, 125.0];

/// One symbol of a cluster grid: a representative feature of a contributing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub layer_id: LayerId,
    /// Members of the cluster from this layer.
    pub count: usize,
    pub feature: Arc<Feature>,
    pub offset_px: Coord,
}

/// One member of a spiderfied cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SpiderLeg {
    pub feature: Arc<Feature>,
    pub offset_px: Coord,
    /// Leg end in map units; the leg is drawn from the cluster center to here.
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Graphic {
    /// A single-member cluster drawn as its feature.
    Feature { point: Point, feature: Arc<Feature> },
    /// One aggregate glyph sized by the cluster's share of the largest cluster.
    ClusterSymbol {
        point: Point,
        cluster_id: usize,
        cluster_count: usize,
        size: f64,
        label: Option<String>,
    },
    /// One symbol per contributing layer on a square grid.
    ClusterGrid {
        point: Point,
        cluster_id: usize,
        cluster_count: usize,
        cells: Vec<GridCell>,
    },
    /// Coincident members fanned out around a center glyph.
    Spiderfy {
        center: Point,
        cluster_id: usize,
        cluster_count: usize,
        legs: Vec<SpiderLeg>,
    },
}

impl Graphic {
    pub fn point(&self) -> Point {
        match self {
            Self::Feature { point, .. }
            | Self::ClusterSymbol { point, .. }
            | Self::ClusterGrid { point, .. } => *point,
            Self::Spiderfy { center, .. } => *center,
        }
    }
}

/// Project every cluster of a pass.
pub fn project_clusters(clusters: &[Cluster], view: &ViewState, layout: &LayoutConfig) -> Vec<Graphic> {
    let max_count = clusters
        .iter()
        .map(Cluster::cluster_count)
        .max()
        .unwrap_or(0);
    let resolution = view.resolution();
    clusters
        .iter()
        .map(|cluster| project_cluster(cluster, max_count, resolution, layout))
        .collect()
}

/// Project one cluster. `max_count` is the largest member count in the pass.
pub fn project_cluster(
    cluster: &Cluster,
    max_count: usize,
    resolution: f64,
    layout: &LayoutConfig,
) -> Graphic {
    let center = cluster.centroid();

    if cluster.is_single()
        && let Some(feature) = cluster.features().first()
    {
        return Graphic::Feature {
            point: center,
            feature: Arc::clone(feature),
        };
    }

    if cluster.spiderfying() {
        let offsets = spiderfy_offsets(cluster.cluster_count(), layout);
        let legs = cluster
            .features()
            .iter()
            .zip(offsets)
            .map(|(feature, offset)| SpiderLeg {
                feature: Arc::clone(feature),
                offset_px: offset,
                end: Point::new(
                    center.x() + offset.x * resolution,
                    center.y() + offset.y * resolution,
                ),
            })
            .collect();
        return Graphic::Spiderfy {
            center,
            cluster_id: cluster.cluster_id(),
            cluster_count: cluster.cluster_count(),
            legs,
        };
    }

    if layout.show_cluster_grid {
        return Graphic::ClusterGrid {
            point: center,
            cluster_id: cluster.cluster_id(),
            cluster_count: cluster.cluster_count(),
            cells: grid_cells(cluster, layout),
        };
    }

    Graphic::ClusterSymbol {
        point: center,
        cluster_id: cluster.cluster_id(),
        cluster_count: cluster.cluster_count(),
        size: symbol_size(cluster.cluster_count(), max_count),
        label: layout
            .show_cluster_size
            .then(|| cluster.cluster_count().to_string()),
    }
}

/// Aggregate marker size for `count` given the largest count of the pass.
///
/// Classes break at 20/40/60/80 % of `max_count`.
pub fn symbol_size(count: usize, max_count: usize) -> f64 {
    let count = count as f64;
    let max = max_count as f64;
    let class = [0.2, 0.4, 0.6, 0.8]
        .iter()
        .position(|share| count < share * max)
        .unwrap_or(4);
    SIZE_CLASSES[class]
}

/// Top `grid_max_layers` contributing layers by member count, with their grid offsets.
fn grid_cells(cluster: &Cluster, layout: &LayoutConfig) -> Vec<GridCell> {
    let mut per_layer: Vec<(&str, usize, &Arc<Feature>)> = Vec::new();
    for feature in cluster.features() {
        match per_layer.iter_mut().find(|(id, _, _)| *id == feature.layer_id()) {
            Some(entry) => entry.1 += 1,
            None => per_layer.push((feature.layer_id(), 1, feature)),
        }
    }
    // stable: ties keep first-seen order
    per_layer.sort_by(|a, b| b.1.cmp(&a.1));
    per_layer.truncate(layout.grid_max_layers);

    let offsets = grid_offsets(per_layer.len(), layout.symbol_base_size);
    per_layer
        .into_iter()
        .zip(offsets)
        .map(|((layer_id, count, feature), offset)| GridCell {
            layer_id: layer_id.to_string(),
            count,
            feature: Arc::clone(feature),
            offset_px: offset,
        })
        .collect()
}

/// Offsets of `n` symbols on a centered square grid with `spacing` px between them,
/// filled row by row from the top left.
pub fn grid_offsets(n: usize, spacing: f64) -> Vec<Coord> {
    if n == 0 {
        return Vec::new();
    }
    let grid = (n as f64).sqrt().ceil() as usize;
    let cols = grid.min(n);
    let rows = n.div_ceil(grid);
    let origin_x = (cols - 1) as f64 * spacing;
    let origin_y = (rows - 1) as f64 * spacing;

    (0..n)
        .map(|i| {
            coord! {
                x: -origin_x / 2.0 + (i % grid) as f64 * spacing,
                y: origin_y / 2.0 - (i / grid) as f64 * spacing,
            }
        })
        .collect()
}

/// Leg offsets for `n` spiderfied members: a circle up to `circle_max_members`,
/// a spiral beyond.
pub fn spiderfy_offsets(n: usize, layout: &LayoutConfig) -> Vec<Coord> {
    if n <= layout.circle_max_members {
        circle_offsets(n, layout)
    } else {
        spiral_offsets(n, layout)
    }
}

/// Even counts start on the left, odd counts at the top.
fn circle_offsets(n: usize, layout: &LayoutConfig) -> Vec<Coord> {
    if n == 0 {
        return Vec::new();
    }
    let start = if n % 2 == 0 { -PI } else { -PI / 2.0 };
    let circumference =
        layout.spiderfy_distance_multiplier * layout.symbol_base_size * (3 + n) as f64;
    let radius = circumference / (2.0 * PI);
    let step = 2.0 * PI / n as f64;

    (0..n)
        .map(|i| {
            let angle = start + i as f64 * step;
            coord! { x: radius * angle.cos(), y: radius * angle.sin() }
        })
        .collect()
}

/// Higher indices sit closer to the center.
fn spiral_offsets(n: usize, layout: &LayoutConfig) -> Vec<Coord> {
    let mut offsets = vec![coord! { x: 0.0, y: 0.0 }; n];
    let mut radius = layout.spiderfy_distance_multiplier * layout.spiral_length_start;
    let separation = layout.symbol_base_size;
    let length_factor = layout.spiderfy_distance_multiplier * layout.spiral_length_factor * 2.0 * PI;
    let mut angle = 0.0;

    for i in (0..n).rev() {
        angle += separation / radius + i as f64 * 0.0005;
        offsets[i] = coord! { x: radius * angle.cos(), y: radius * angle.sin() };
        radius += length_factor / angle;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpatialReference;
    use geo::Rect;
    use serde_json::{Map, json};

    fn member(id: i64, layer: &str, x: f64, y: f64) -> (Arc<Feature>, Point) {
        let mut attrs = Map::new();
        attrs.insert("objectid".to_string(), json!(id));
        let mut feature = Feature::point(x, y, attrs);
        feature.tag_layer(layer, None);
        (Arc::new(feature), Point::new(x, y))
    }

    fn cluster_of(members: &[(i64, &str, f64, f64)]) -> Cluster {
        let (f, p) = member(members[0].0, members[0].1, members[0].2, members[0].3);
        let mut cluster = Cluster::create(f, p, 1);
        for &(id, layer, x, y) in &members[1..] {
            let (f, p) = member(id, layer, x, y);
            cluster.add_point(f, p);
        }
        cluster
    }

    fn view() -> ViewState {
        ViewState::new(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 200.0, y: 100.0 }),
            100.0,
            50.0,
        )
        .with_spatial_reference(SpatialReference::new(25832))
    }

    #[test]
    fn test_symbol_size_classes() {
        assert_eq!(symbol_size(1, 100), 25.0);
        assert_eq!(symbol_size(30, 100), 25.0);
        assert_eq!(symbol_size(45, 100), 75.0);
        assert_eq!(symbol_size(70, 100), 100.0);
        assert_eq!(symbol_size(80, 100), 125.0);
        assert_eq!(symbol_size(100, 100), 125.0);
    }

    #[test]
    fn test_single_member_projects_as_feature() {
        let cluster = cluster_of(&[(1, "a", 5.0, 5.0)]);
        let graphics = project_clusters(&[cluster], &view(), &LayoutConfig::default());
        assert!(matches!(graphics[0], Graphic::Feature { .. }));
        assert_eq!(graphics[0].point(), Point::new(5.0, 5.0));
    }

    #[test]
    fn test_aggregate_symbol_has_label() {
        let big = cluster_of(&[(1, "a", 0.0, 0.0), (2, "a", 1.0, 0.0), (3, "a", 2.0, 0.0)]);
        let small = cluster_of(&[(4, "a", 50.0, 0.0), (5, "a", 51.0, 0.0)]);
        let graphics = project_clusters(&[big, small], &view(), &LayoutConfig::default());
        match &graphics[0] {
            Graphic::ClusterSymbol { size, label, .. } => {
                assert_eq!(*size, 125.0);
                assert_eq!(label.as_deref(), Some("3"));
            }
            other => panic!("unexpected graphic {:?}", other),
        }
        match &graphics[1] {
            Graphic::ClusterSymbol { size, .. } => assert_eq!(*size, 100.0),
            other => panic!("unexpected graphic {:?}", other),
        }
    }

    #[test]
    fn test_grid_orders_layers_by_count() {
        let cluster = cluster_of(&[
            (1, "a", 0.0, 0.0),
            (2, "b", 0.0, 0.0),
            (3, "b", 0.0, 0.0),
            (4, "c", 0.0, 0.0),
        ]);
        let layout = LayoutConfig {
            show_cluster_grid: true,
            grid_max_layers: 2,
            ..LayoutConfig::default()
        };
        let Graphic::ClusterGrid { cells, .. } = project_cluster(&cluster, 4, 1.0, &layout) else {
            panic!("expected a grid");
        };
        let layers: Vec<_> = cells.iter().map(|c| (c.layer_id.as_str(), c.count)).collect();
        assert_eq!(layers, vec![("b", 2), ("a", 1)]);
    }

    #[test]
    fn test_grid_offsets_are_centered() {
        let offsets = grid_offsets(4, 10.0);
        assert_eq!(offsets[0], coord! { x: -5.0, y: 5.0 });
        assert_eq!(offsets[1], coord! { x: 5.0, y: 5.0 });
        assert_eq!(offsets[2], coord! { x: -5.0, y: -5.0 });
        assert_eq!(offsets[3], coord! { x: 5.0, y: -5.0 });

        assert_eq!(grid_offsets(1, 10.0), vec![coord! { x: 0.0, y: 0.0 }]);
        // 3 symbols still use a 2x2 grid
        let three = grid_offsets(3, 10.0);
        assert_eq!(three[2], coord! { x: -5.0, y: -5.0 });
    }

    #[test]
    fn test_circle_layout() {
        let layout = LayoutConfig::default();
        let offsets = spiderfy_offsets(2, &layout);
        let radius = 25.0 * 5.0 / (2.0 * PI);
        // even count starts on the left
        assert!((offsets[0].x + radius).abs() < 1e-9);
        assert!(offsets[0].y.abs() < 1e-9);
        assert!((offsets[1].x - radius).abs() < 1e-9);

        // odd count starts on the vertical axis
        let odd = spiderfy_offsets(3, &layout);
        assert!(odd[0].x.abs() < 1e-9);
        assert!(odd[0].y < 0.0);
    }

    #[test]
    fn test_spiral_layout_for_large_clusters() {
        let layout = LayoutConfig::default();
        let offsets = spiderfy_offsets(12, &layout);
        assert_eq!(offsets.len(), 12);
        let radius = |c: &Coord| c.x.hypot(c.y);
        // the last member is placed first, on the innermost turn
        assert!((radius(&offsets[11]) - 20.0).abs() < 1e-9);
        assert!(radius(&offsets[0]) > radius(&offsets[11]));
    }

    #[test]
    fn test_spiderfy_legs_use_resolution() {
        let mut cluster = cluster_of(&[(1, "a", 10.0, 10.0), (2, "a", 10.0, 10.0)]);
        cluster.set_spiderfying(true);
        let graphics = project_clusters(&[cluster], &view(), &LayoutConfig::default());
        let Graphic::Spiderfy { center, legs, .. } = &graphics[0] else {
            panic!("expected spiderfy");
        };
        assert_eq!(legs.len(), 2);
        // resolution is 2 map units per pixel
        let leg = &legs[0];
        assert!((leg.end.x() - (center.x() + leg.offset_px.x * 2.0)).abs() < 1e-9);
        assert!((leg.end.y() - (center.y() + leg.offset_px.y * 2.0)).abs() < 1e-9);
    }
}
