//! Core data model: features, identities, spatial references and view state.

use crate::error::{ClusterError, Result};
use geo::{Centroid, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a source (sub)layer, e.g. `"parcels/3"`.
pub type LayerId = String;

/// Half the width of the Web Mercator world in meters.
pub const WEB_MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// Layer-scoped feature identity, taken from the configured object-id attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Int(i64),
    Str(String),
}

impl ObjectId {
    /// Derive an id from an attribute value.
    ///
    /// Integral numbers become [`ObjectId::Int`], strings become [`ObjectId::Str`].
    /// Anything else (floats with a fraction, null, objects) yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| Self::Int(f as i64))
                }
            }
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for ObjectId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Spatial reference by well-known id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialReference {
    pub wkid: u32,
}

impl SpatialReference {
    /// Geographic WGS84 (degrees).
    pub const WGS84: Self = Self { wkid: 4326 };
    /// Web Mercator (meters).
    pub const WEB_MERCATOR: Self = Self { wkid: 3857 };

    pub const fn new(wkid: u32) -> Self {
        Self { wkid }
    }

    /// Width of one revolution of the world in this reference, if it wraps at the
    /// antimeridian. Projected references that do not wrap return `None`.
    pub fn world_width(&self) -> Option<f64> {
        match self.wkid {
            4326 => Some(360.0),
            3857 | 102100 | 102113 | 900913 => Some(2.0 * WEB_MERCATOR_HALF_WORLD),
            _ => None,
        }
    }

    pub fn is_wrappable(&self) -> bool {
        self.world_width().is_some()
    }
}

impl Default for SpatialReference {
    fn default() -> Self {
        Self::WEB_MERCATOR
    }
}

/// Geometry of a fetched feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "geometry", rename_all = "snake_case")]
pub enum FeatureGeometry {
    Point(Point),
    Polygon(Polygon),
}

impl FeatureGeometry {
    /// The location used for clustering: the point itself, or a polygon's centroid.
    pub fn location(&self) -> Option<Point> {
        let point = match self {
            Self::Point(p) => Some(*p),
            Self::Polygon(poly) => poly.centroid(),
        }?;
        if point.x().is_finite() && point.y().is_finite() {
            Some(point)
        } else {
            None
        }
    }
}

/// A server-hosted feature.
///
/// Immutable once absorbed into the cache; clusters hold `Arc<Feature>` references to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    geometry: Option<FeatureGeometry>,
    spatial_reference: SpatialReference,
    attributes: Map<String, Value>,
    layer_id: LayerId,
    layer_title: Option<String>,
    #[serde(skip)]
    location: Option<Point>,
}

impl Feature {
    /// Create a feature. The clustering location is derived from the geometry here,
    /// once, so polygon centroids are not recomputed on every pass.
    pub fn new(geometry: Option<FeatureGeometry>, attributes: Map<String, Value>) -> Self {
        let location = geometry.as_ref().and_then(FeatureGeometry::location);
        if geometry.is_some() && location.is_none() {
            log::warn!("Feature geometry has no usable location; it will not be drawn");
        }
        Self {
            geometry,
            spatial_reference: SpatialReference::default(),
            attributes,
            layer_id: LayerId::new(),
            layer_title: None,
            location,
        }
    }

    /// Point feature shorthand.
    pub fn point(x: f64, y: f64, attributes: Map<String, Value>) -> Self {
        Self::new(
            Some(FeatureGeometry::Point(Point::new(x, y))),
            attributes,
        )
    }

    pub fn with_spatial_reference(mut self, spatial_reference: SpatialReference) -> Self {
        self.spatial_reference = spatial_reference;
        self
    }

    pub fn geometry(&self) -> Option<&FeatureGeometry> {
        self.geometry.as_ref()
    }

    /// Clustering location; `None` for features without usable geometry.
    pub fn location(&self) -> Option<Point> {
        self.location
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Identity derived from `object_id_field`.
    pub fn object_id(&self, object_id_field: &str) -> Option<ObjectId> {
        self.attributes
            .get(object_id_field)
            .and_then(ObjectId::from_value)
    }

    /// Owning source layer; empty until the feature is absorbed.
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn layer_title(&self) -> Option<&str> {
        self.layer_title.as_deref()
    }

    pub(crate) fn tag_layer(&mut self, layer_id: &str, layer_title: Option<&str>) {
        self.layer_id = layer_id.to_string();
        self.layer_title = layer_title.map(str::to_string);
    }
}

/// Snapshot of the host view that drives a clustering pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// Visible extent in map units (may straddle the antimeridian).
    pub extent: Rect,
    pub spatial_reference: SpatialReference,
    /// Current map scale denominator, when the view exposes one.
    pub scale: Option<f64>,
    /// Viewport size in screen pixels.
    pub width_px: f64,
    pub height_px: f64,
}

impl ViewState {
    pub fn new(extent: Rect, width_px: f64, height_px: f64) -> Self {
        Self {
            extent,
            spatial_reference: SpatialReference::default(),
            scale: None,
            width_px,
            height_px,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_spatial_reference(mut self, spatial_reference: SpatialReference) -> Self {
        self.spatial_reference = spatial_reference;
        self
    }

    /// Map units per screen pixel.
    pub fn resolution(&self) -> f64 {
        crate::geometry::resolution(self.extent.width(), self.width_px)
    }

    pub fn validate(&self) -> Result<()> {
        let min = self.extent.min();
        let max = self.extent.max();
        if ![min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite()) {
            return Err(ClusterError::InvalidInput(
                "View extent must have finite coordinates".to_string(),
            ));
        }
        if !(self.width_px.is_finite() && self.width_px > 0.0) {
            return Err(ClusterError::InvalidInput(format!(
                "View width must be positive, got: {}",
                self.width_px
            )));
        }
        if !(self.height_px.is_finite() && self.height_px > 0.0) {
            return Err(ClusterError::InvalidInput(format!(
                "View height must be positive, got: {}",
                self.height_px
            )));
        }
        if let Some(scale) = self.scale
            && !(scale.is_finite() && scale > 0.0)
        {
            return Err(ClusterError::InvalidInput(format!(
                "View scale must be positive, got: {}",
                scale
            )));
        }
        Ok(())
    }
}
