//! Click and hover handling: event emission and zoom-to-cluster decisions.

use crate::cluster::{Cluster, ClusterSummary};
use crate::geometry::have_same_position;
use crate::types::Feature;
use geo::{ConvexHull, MultiPoint, Point, Polygon, Rect, coord};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Members closer than this to the centroid (px) make a click zoom pointless.
pub const SAME_POSITION_PX: f64 = 50.0;
/// A zoom target is grown until its width or height reaches this many map units.
pub const MIN_ZOOM_EXTENT: f64 = 300.0;
pub const ZOOM_EXPAND_FACTOR: f64 = 1.5;
/// Scale to center at when the cluster extent has no width.
pub const CENTER_ZOOM_SCALE: f64 = 5000.0;

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Event delivered to subscribers of a cluster layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    ClusterClick(ClusterSummary),
    ClusterHover(ClusterSummary),
    ClusterHoverEnd,
    /// Click on a single-member cluster.
    FeatureClick(Arc<Feature>),
    FeatureHover(Arc<Feature>),
}

/// Fan-out of [`ClusterEvent`]s to any number of subscribers.
///
/// Slow subscribers lose the oldest events rather than blocking the layer.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn emit(&self, event: ClusterEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// What the host view should do after a cluster click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomAction {
    /// Leave the view as it is.
    Stay,
    ZoomTo(Rect),
    CenterAt { point: Point, scale: f64 },
}

/// Decide how to zoom to a clicked cluster.
pub fn zoom_action(cluster: &Cluster, resolution: f64, zoom_on_click: bool) -> ZoomAction {
    if !zoom_on_click
        || have_same_position(
            cluster.features(),
            &cluster.centroid(),
            SAME_POSITION_PX,
            Some(resolution),
        )
    {
        return ZoomAction::Stay;
    }

    let mut extent = cluster.extent_rect();
    if extent.width() <= 0.0 {
        return ZoomAction::CenterAt {
            point: cluster.centroid(),
            scale: CENTER_ZOOM_SCALE,
        };
    }
    while extent.width() < MIN_ZOOM_EXTENT && extent.height() < MIN_ZOOM_EXTENT {
        extent = expand(&extent, ZOOM_EXPAND_FACTOR);
    }
    ZoomAction::ZoomTo(extent)
}

/// Scale `rect` about its center.
pub fn expand(rect: &Rect, factor: f64) -> Rect {
    let center = rect.center();
    let half_w = rect.width() * factor / 2.0;
    let half_h = rect.height() * factor / 2.0;
    Rect::new(
        coord! { x: center.x - half_w, y: center.y - half_h },
        coord! { x: center.x + half_w, y: center.y + half_h },
    )
}

/// Convex hull of the member locations, drawn as the cluster area on hover.
pub fn cluster_area(cluster: &Cluster) -> Option<Polygon> {
    if cluster.is_single() {
        return None;
    }
    let points: MultiPoint = cluster
        .features()
        .iter()
        .filter_map(|f| f.location())
        .collect::<Vec<_>>()
        .into();
    Some(points.convex_hull())
}
