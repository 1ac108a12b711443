//! Cluster layer facade and its builder.
//!
//! A [`ClusterLayer`] is what a host map widget binds to: it forwards view changes to
//! the scheduler, exposes the current clusters and their graphics, and turns clicks and
//! hovers into events and zoom decisions.

use crate::cluster::{Cluster, ClusterSummary};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::interaction::{ClusterEvent, EventBus, ZoomAction, cluster_area, zoom_action};
use crate::layers::{Sublayer, SublayerTree};
use crate::projection::{Graphic, project_clusters};
use crate::scheduler::{CycleOutcome, ReclusterScheduler, ViewSignal};
use crate::transport::FeatureSource;
use crate::types::{Feature, LayerId, ObjectId, ViewState};
use geo::Polygon;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Builder for a [`ClusterLayer`].
#[derive(Debug, Clone)]
pub struct ClusterLayerBuilder {
    config: ClusterConfig,
    sublayers: Vec<Sublayer>,
    event_capacity: usize,
}

impl ClusterLayerBuilder {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
            sublayers: Vec::new(),
            event_capacity: 64,
        }
    }

    pub fn config(mut self, config: ClusterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the sublayer hierarchy.
    pub fn sublayers(mut self, sublayers: Vec<Sublayer>) -> Self {
        self.sublayers = sublayers;
        self
    }

    /// Append one sublayer.
    pub fn sublayer(mut self, sublayer: Sublayer) -> Self {
        self.sublayers.push(sublayer);
        self
    }

    /// Events buffered per subscriber before the oldest are dropped.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration and hierarchy and create the layer.
    pub fn build<S: FeatureSource>(self, source: S) -> Result<ClusterLayer<S>> {
        if self.sublayers.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "At least one sublayer is required".to_string(),
            ));
        }
        let tree = SublayerTree::new(self.sublayers)?;
        let scheduler = ReclusterScheduler::new(source, self.config, tree)?;
        Ok(ClusterLayer {
            scheduler,
            events: EventBus::new(self.event_capacity),
        })
    }
}

impl Default for ClusterLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A clustered view over one feature service.
pub struct ClusterLayer<S> {
    scheduler: ReclusterScheduler<S>,
    events: EventBus,
}

impl<S: FeatureSource> ClusterLayer<S> {
    pub fn builder() -> ClusterLayerBuilder {
        ClusterLayerBuilder::new()
    }

    pub fn config(&self) -> &ClusterConfig {
        self.scheduler.config()
    }

    pub fn scheduler(&self) -> &ReclusterScheduler<S> {
        &self.scheduler
    }

    /// Report that the view became stationary at `view`.
    pub fn set_view_state(&self, view: ViewState) -> Result<()> {
        self.scheduler.notify(ViewSignal::ExtentStationary(view))
    }

    pub fn set_layer_visibility(&self, layer_id: &str, visible: bool) -> Result<()> {
        self.scheduler.notify(ViewSignal::VisibilityChanged {
            layer_id: layer_id.to_string(),
            visible,
        })
    }

    pub fn set_sublayers(&self, sublayers: Vec<Sublayer>) -> Result<()> {
        self.scheduler.notify(ViewSignal::LayersChanged(sublayers))
    }

    /// Drop all cached data and fetch again on the next cycle.
    pub fn reinit(&self) -> Result<()> {
        self.scheduler.notify(ViewSignal::Reinit)
    }

    /// Restrict the layer to fixed object ids per sublayer, or return to extent queries.
    pub fn set_data(&self, ids: Option<FxHashMap<LayerId, Vec<ObjectId>>>) -> Result<()> {
        self.scheduler.notify(ViewSignal::SetData(ids))
    }

    pub fn notify(&self, signal: ViewSignal) -> Result<()> {
        self.scheduler.notify(signal)
    }

    /// Add host-supplied features to a sublayer's cache.
    pub fn absorb_features(&self, layer_id: &str, features: Vec<Feature>) -> Result<usize> {
        self.scheduler.absorb_features(layer_id, features)
    }

    pub async fn run_pending(&self) -> CycleOutcome {
        self.scheduler.run_pending().await
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.scheduler.clusters()
    }

    /// Read-only attributes of every current cluster.
    pub fn summaries(&self) -> Vec<ClusterSummary> {
        let field = &self.config().object_id_field;
        self.scheduler
            .with_clusters(|clusters| clusters.iter().map(|c| c.summary(field)).collect())
    }

    /// Renderable graphics for the current clusters; empty before the first view.
    pub fn graphics(&self) -> Vec<Graphic> {
        let Some(view) = self.scheduler.view() else {
            return Vec::new();
        };
        let layout = &self.config().layout;
        self.scheduler
            .with_clusters(|clusters| project_clusters(clusters, &view, layout))
    }

    /// Handle a click on the cluster the renderer reports by id and count.
    pub fn click(&self, cluster_id: usize, cluster_count: usize) -> Result<ZoomAction> {
        let cluster = self.lookup(cluster_id, cluster_count)?;
        if let [feature] = cluster.features() {
            self.events.emit(ClusterEvent::FeatureClick(Arc::clone(feature)));
            return Ok(ZoomAction::Stay);
        }

        self.events.emit(ClusterEvent::ClusterClick(
            cluster.summary(&self.config().object_id_field),
        ));
        let resolution = self.scheduler.view().map_or(1.0, |v| v.resolution());
        Ok(zoom_action(&cluster, resolution, self.config().zoom_on_click))
    }

    /// Handle the pointer entering a cluster. Returns the cluster area to highlight
    /// when `show_cluster_area` is on.
    pub fn hover(&self, cluster_id: usize, cluster_count: usize) -> Result<Option<Polygon>> {
        let cluster = self.lookup(cluster_id, cluster_count)?;
        if let [feature] = cluster.features() {
            self.events.emit(ClusterEvent::FeatureHover(Arc::clone(feature)));
            return Ok(None);
        }

        self.events.emit(ClusterEvent::ClusterHover(
            cluster.summary(&self.config().object_id_field),
        ));
        if self.config().show_cluster_area {
            Ok(cluster_area(&cluster))
        } else {
            Ok(None)
        }
    }

    pub fn hover_end(&self) {
        self.events.emit(ClusterEvent::ClusterHoverEnd);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Current clusters as a GeoJSON FeatureCollection.
    #[cfg(feature = "geojson")]
    pub fn clusters_geojson(&self) -> Result<String> {
        let field = &self.config().object_id_field;
        self.scheduler
            .with_clusters(|clusters| crate::geojson::clusters_to_geojson(clusters, field))
    }

    fn lookup(&self, cluster_id: usize, cluster_count: usize) -> Result<Cluster> {
        self.scheduler
            .find_cluster(cluster_id, cluster_count)
            .ok_or_else(|| {
                ClusterError::InvalidInput(format!(
                    "No cluster with id {} and {} members",
                    cluster_id, cluster_count
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemorySource;
    use crate::types::SpatialReference;
    use geo::{Rect, coord};
    use serde_json::{Map, json};

    fn feature(id: i64, x: f64, y: f64) -> Feature {
        let mut attrs = Map::new();
        attrs.insert("objectid".to_string(), json!(id));
        Feature::point(x, y, attrs)
    }

    fn view() -> ViewState {
        ViewState::new(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1000.0, y: 1000.0 }),
            1000.0,
            1000.0,
        )
        .with_spatial_reference(SpatialReference::new(25832))
    }

    fn layer() -> ClusterLayer<MemorySource> {
        let source = MemorySource::new("objectid");
        source.insert(
            "poi",
            vec![
                feature(1, 100.0, 100.0),
                feature(2, 400.0, 100.0),
                feature(3, 900.0, 900.0),
            ],
        );
        ClusterLayerBuilder::new()
            .config(
                ClusterConfig::default()
                    .with_cluster_distance(400.0)
                    .with_show_cluster_area(true),
            )
            .sublayer(Sublayer::new("poi").with_title("Points of interest"))
            .build(source)
            .unwrap()
    }

    #[test]
    fn test_builder_requires_sublayers() {
        let result = ClusterLayerBuilder::new().build(MemorySource::new("objectid"));
        assert!(matches!(result, Err(ClusterError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = ClusterConfig {
            cluster_distance: -1.0,
            ..ClusterConfig::default()
        };
        let result = ClusterLayerBuilder::new()
            .config(config)
            .sublayer(Sublayer::new("poi"))
            .build(MemorySource::new("objectid"));
        assert!(matches!(result, Err(ClusterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_click_emits_and_zooms() {
        let layer = layer();
        let mut events = layer.subscribe();
        layer.set_view_state(view()).unwrap();
        layer.run_pending().await;

        let clusters = layer.clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].features()[0].layer_title(), Some("Points of interest"));

        let action = layer.click(1, 2).unwrap();
        assert!(matches!(action, ZoomAction::ZoomTo(_)));
        match events.recv().await.unwrap() {
            ClusterEvent::ClusterClick(summary) => assert_eq!(summary.cluster_count, 2),
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(layer.click(2, 1).unwrap(), ZoomAction::Stay);
        assert!(matches!(
            events.recv().await.unwrap(),
            ClusterEvent::FeatureClick(_)
        ));
        assert!(layer.click(7, 7).is_err());
    }

    #[tokio::test]
    async fn test_hover_returns_area() {
        let layer = layer();
        layer.set_view_state(view()).unwrap();
        layer.run_pending().await;

        let area = layer.hover(1, 2).unwrap();
        assert!(area.is_some());
        assert_eq!(layer.hover(2, 1).unwrap(), None);
    }

    #[tokio::test]
    async fn test_graphics_follow_clusters() {
        let layer = layer();
        assert!(layer.graphics().is_empty());
        layer.set_view_state(view()).unwrap();
        layer.run_pending().await;

        let graphics = layer.graphics();
        assert_eq!(graphics.len(), 2);
        assert!(matches!(graphics[0], Graphic::ClusterSymbol { .. }));
        assert!(matches!(graphics[1], Graphic::Feature { .. }));
        assert_eq!(layer.summaries()[0].object_ids.len(), 2);
    }
}
