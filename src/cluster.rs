//! Cluster aggregate built during a single clustering pass.

use crate::types::{Feature, ObjectId, SpatialReference};
use geo::{Point, Rect, coord};
use serde::Serialize;
use std::sync::Arc;

/// An ephemeral group of features produced by one clustering pass.
///
/// `cluster_id` is only unique within the pass that produced it. Members are held by
/// reference into the feature cache, in assignment order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    x: f64,
    y: f64,
    spatial_reference: SpatialReference,
    cluster_count: usize,
    extent: [f64; 4],
    cluster_id: usize,
    features: Vec<Arc<Feature>>,
    spiderfying: bool,
}

impl Cluster {
    /// Singleton cluster with a degenerate extent `[x, y, x, y]`.
    pub fn create(feature: Arc<Feature>, point: Point, cluster_id: usize) -> Self {
        Self {
            x: point.x(),
            y: point.y(),
            spatial_reference: feature.spatial_reference(),
            cluster_count: 1,
            extent: [point.x(), point.y(), point.x(), point.y()],
            cluster_id,
            features: vec![feature],
            spiderfying: false,
        }
    }

    /// Merge a point into the cluster.
    ///
    /// The centroid is an online running mean, `new = (p + old * n) / (n + 1)`, so the
    /// result depends on arrival order at the floating point level.
    pub fn add_point(&mut self, feature: Arc<Feature>, point: Point) {
        let n = self.cluster_count as f64;
        let x = (point.x() + self.x * n) / (n + 1.0);
        let y = (point.y() + self.y * n) / (n + 1.0);

        self.extent[0] = self.extent[0].min(point.x());
        self.extent[1] = self.extent[1].min(point.y());
        self.extent[2] = self.extent[2].max(point.x());
        self.extent[3] = self.extent[3].max(point.y());

        // rounding can push the mean an ulp outside the member box
        self.x = x.clamp(self.extent[0], self.extent[2]);
        self.y = y.clamp(self.extent[1], self.extent[3]);

        self.cluster_count += 1;
        self.features.push(feature);
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn centroid(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    /// Bounding box of the members as `[min_x, min_y, max_x, max_y]`.
    pub fn extent(&self) -> [f64; 4] {
        self.extent
    }

    pub fn extent_rect(&self) -> Rect {
        Rect::new(
            coord! { x: self.extent[0], y: self.extent[1] },
            coord! { x: self.extent[2], y: self.extent[3] },
        )
    }

    pub fn cluster_id(&self) -> usize {
        self.cluster_id
    }

    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }

    pub fn is_single(&self) -> bool {
        self.cluster_count == 1
    }

    pub fn spiderfying(&self) -> bool {
        self.spiderfying
    }

    pub(crate) fn set_spiderfying(&mut self, spiderfying: bool) {
        self.spiderfying = spiderfying && self.cluster_count > 1;
    }

    /// Whether the centroid lies inside the member bounding box.
    pub fn centroid_in_extent(&self) -> bool {
        self.x >= self.extent[0]
            && self.x <= self.extent[2]
            && self.y >= self.extent[1]
            && self.y <= self.extent[3]
    }

    /// Read-only attribute view handed to the rendering layer and event listeners.
    pub fn summary(&self, object_id_field: &str) -> ClusterSummary {
        ClusterSummary {
            cluster_id: self.cluster_id,
            cluster_count: self.cluster_count,
            x: self.x,
            y: self.y,
            extent: self.extent,
            spiderfying: self.spiderfying,
            object_ids: self
                .features
                .iter()
                .map(|f| (f.layer_id().to_string(), f.object_id(object_id_field)))
                .collect(),
        }
    }
}

/// Serializable cluster attributes, as emitted with click/hover events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub cluster_count: usize,
    pub x: f64,
    pub y: f64,
    pub extent: [f64; 4],
    pub spiderfying: bool,
    /// `(layer_id, object_id)` of every member in assignment order.
    pub object_ids: Vec<(String, Option<ObjectId>)>,
}
