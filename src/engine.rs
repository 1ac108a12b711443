//! Greedy single-pass clustering of cached draw candidates.
//!
//! Each pass starts from scratch: the previous cluster list is dropped and no identity
//! or membership carries over. Features are visited layer by layer (registration order
//! of the enabled leaves) and, inside a layer, in draw-candidate order. A feature joins
//! the first existing cluster, in creation order, whose centroid is within tolerance;
//! otherwise it opens a new cluster. This is first-fit, not nearest-fit, so the result
//! depends on arrival order.

use crate::cache::FeatureCache;
use crate::cluster::Cluster;
use crate::extent::ExtentArea;
use crate::geometry::{have_same_position, within_cluster_distance};
use crate::layers::SublayerTree;
use crate::types::Feature;
use std::sync::Arc;

/// Clustering tolerance for the current map scale.
///
/// At or below `max_cluster_scale` clustering is switched off (tolerance 0). Views
/// without a scale always use `cluster_distance`.
pub fn select_tolerance(cluster_distance: f64, max_cluster_scale: f64, scale: Option<f64>) -> f64 {
    match scale {
        Some(s) if s <= max_cluster_scale => 0.0,
        _ => cluster_distance,
    }
}

/// Inputs of one pass besides the features themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassParams {
    /// Merge tolerance in screen pixels; 0 gives every feature its own cluster.
    pub tolerance: f64,
    /// Map units per pixel.
    pub resolution: f64,
    /// Pixel distance under which a multi-member cluster is marked for spiderfying.
    /// `None` skips spiderfy detection.
    pub spiderfying_distance: Option<f64>,
}

/// Counters of the most recent pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub candidates: usize,
    pub outside_extent: usize,
    pub without_location: usize,
    pub clusters: usize,
    pub spiderfied: usize,
}

#[derive(Debug, Default)]
pub struct ClusteringEngine {
    clusters: Vec<Cluster>,
    stats: PassStats,
}

impl ClusteringEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a full pass over every enabled leaf layer of `tree`.
    pub fn cluster(
        &mut self,
        tree: &SublayerTree,
        cache: &FeatureCache,
        area: &ExtentArea,
        params: &PassParams,
    ) -> &[Cluster] {
        self.clear();
        for layer in tree.enabled_leaves() {
            for feature in cache.draw_candidates(&layer.id) {
                self.assign(feature, area, params);
            }
        }
        self.finish(params);
        &self.clusters
    }

    /// Run a full pass over an explicit feature sequence.
    pub fn cluster_features<'a, I>(
        &mut self,
        features: I,
        area: &ExtentArea,
        params: &PassParams,
    ) -> &[Cluster]
    where
        I: IntoIterator<Item = &'a Arc<Feature>>,
    {
        self.clear();
        for feature in features {
            self.assign(feature, area, params);
        }
        self.finish(params);
        &self.clusters
    }

    fn assign(&mut self, feature: &Arc<Feature>, area: &ExtentArea, params: &PassParams) {
        self.stats.candidates += 1;
        let Some(point) = feature.location() else {
            self.stats.without_location += 1;
            return;
        };
        if !area.contains_point(&point) {
            self.stats.outside_extent += 1;
            return;
        }

        if params.tolerance > 0.0
            && let Some(cluster) = self
                .clusters
                .iter_mut()
                .find(|c| within_cluster_distance(&point, c, params.tolerance, params.resolution))
        {
            cluster.add_point(Arc::clone(feature), point);
            return;
        }

        let cluster_id = self.clusters.len() + 1;
        self.clusters
            .push(Cluster::create(Arc::clone(feature), point, cluster_id));
    }

    fn finish(&mut self, params: &PassParams) {
        if let Some(distance) = params.spiderfying_distance {
            self.stats.spiderfied = self.mark_spiderfying(distance, params.resolution);
        }
        self.stats.clusters = self.clusters.len();
        log::debug!(
            "Clustering pass: {} candidates -> {} clusters ({} outside extent, {} spiderfied)",
            self.stats.candidates,
            self.stats.clusters,
            self.stats.outside_extent,
            self.stats.spiderfied
        );
    }

    /// Flag multi-member clusters whose members all sit within `distance_px` of the
    /// centroid. Returns the number of flagged clusters.
    pub fn mark_spiderfying(&mut self, distance_px: f64, resolution: f64) -> usize {
        let mut marked = 0;
        for cluster in &mut self.clusters {
            let coincident = cluster.cluster_count() > 1
                && have_same_position(
                    cluster.features(),
                    &cluster.centroid(),
                    distance_px,
                    Some(resolution),
                );
            cluster.set_spiderfying(coincident);
            if coincident {
                marked += 1;
            }
        }
        marked
    }

    /// Drop the current cluster list.
    pub fn clear(&mut self) {
        self.clusters.clear();
        self.stats = PassStats::default();
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// Find a cluster of the current pass from attributes echoed back by the renderer.
    pub fn find(&self, cluster_id: usize, cluster_count: usize) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.cluster_id() == cluster_id && c.cluster_count() == cluster_count)
    }
}
