//! Cluster layer configuration.
//!
//! ```rust
//! use featurecluster::ClusterConfig;
//!
//! let json = r#"{
//!     "object_id_field": "OBJECTID",
//!     "cluster_distance": 60.0,
//!     "max_cluster_scale": 2500.0
//! }"#;
//! let config = ClusterConfig::from_json(json).unwrap();
//! assert_eq!(config.return_limit, 1000);
//! ```

use crate::error::{ClusterError, Result};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options recognized by the cluster layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Attribute holding the feature identity.
    #[serde(default = "ClusterConfig::default_object_id_field")]
    pub object_id_field: String,

    /// Screen distance (px) within which a point joins an existing cluster.
    #[serde(default = "ClusterConfig::default_cluster_distance")]
    pub cluster_distance: f64,

    /// Screen distance (px) under which all members count as coincident.
    #[serde(default = "ClusterConfig::default_spiderfying_distance")]
    pub spiderfying_distance: f64,

    /// At or below this map scale clustering is switched off (tolerance 0).
    #[serde(default)]
    pub max_cluster_scale: f64,

    /// Draw the convex hull of a cluster's members on hover.
    #[serde(default)]
    pub show_cluster_area: bool,

    /// Mark coincident clusters for radial layout.
    #[serde(default = "ClusterConfig::default_show_spiderfying")]
    pub show_spiderfying: bool,

    /// Page size of a features-by-id request.
    #[serde(default = "ClusterConfig::default_return_limit")]
    pub return_limit: usize,

    /// Delay before deferred work runs; 0 defers to the next scheduler turn only.
    #[serde(default)]
    pub debounce_ms: u64,

    /// Zoom to the cluster extent on click.
    #[serde(default = "ClusterConfig::default_zoom_on_click")]
    pub zoom_on_click: bool,

    /// Attribute filter forwarded with every object-id query.
    #[serde(default)]
    pub where_clause: Option<String>,

    #[serde(default)]
    pub layout: LayoutConfig,
}

/// Symbol layout of the rendering projection, in screen pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default = "LayoutConfig::default_symbol_base_size")]
    pub symbol_base_size: f64,

    #[serde(default = "LayoutConfig::default_multiplier")]
    pub spiderfy_distance_multiplier: f64,

    #[serde(default = "LayoutConfig::default_spiral_length_start")]
    pub spiral_length_start: f64,

    #[serde(default = "LayoutConfig::default_spiral_length_factor")]
    pub spiral_length_factor: f64,

    /// Members up to this count are laid out on a circle, more on a spiral.
    #[serde(default = "LayoutConfig::default_circle_max_members")]
    pub circle_max_members: usize,

    /// Draw one symbol per contributing layer instead of a single aggregate glyph.
    #[serde(default)]
    pub show_cluster_grid: bool,

    #[serde(default = "LayoutConfig::default_grid_max_layers")]
    pub grid_max_layers: usize,

    /// Label aggregate glyphs with the member count.
    #[serde(default = "LayoutConfig::default_show_cluster_size")]
    pub show_cluster_size: bool,
}

impl LayoutConfig {
    const fn default_symbol_base_size() -> f64 {
        25.0
    }

    const fn default_multiplier() -> f64 {
        1.0
    }

    const fn default_spiral_length_start() -> f64 {
        20.0
    }

    const fn default_spiral_length_factor() -> f64 {
        3.0
    }

    const fn default_circle_max_members() -> usize {
        9
    }

    const fn default_grid_max_layers() -> usize {
        9
    }

    const fn default_show_cluster_size() -> bool {
        true
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("symbol_base_size", self.symbol_base_size),
            ("spiderfy_distance_multiplier", self.spiderfy_distance_multiplier),
            ("spiral_length_start", self.spiral_length_start),
            ("spiral_length_factor", self.spiral_length_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("Layout {} must be positive, got: {}", name, value));
            }
        }
        if self.grid_max_layers == 0 {
            return Err("Layout grid_max_layers must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            symbol_base_size: Self::default_symbol_base_size(),
            spiderfy_distance_multiplier: Self::default_multiplier(),
            spiral_length_start: Self::default_spiral_length_start(),
            spiral_length_factor: Self::default_spiral_length_factor(),
            circle_max_members: Self::default_circle_max_members(),
            show_cluster_grid: false,
            grid_max_layers: Self::default_grid_max_layers(),
            show_cluster_size: Self::default_show_cluster_size(),
        }
    }
}

impl ClusterConfig {
    fn default_object_id_field() -> String {
        "objectid".to_string()
    }

    const fn default_cluster_distance() -> f64 {
        100.0
    }

    const fn default_spiderfying_distance() -> f64 {
        1.0
    }

    const fn default_show_spiderfying() -> bool {
        true
    }

    const fn default_return_limit() -> usize {
        1000
    }

    const fn default_zoom_on_click() -> bool {
        true
    }

    pub fn with_object_id_field(mut self, field: impl Into<String>) -> Self {
        self.object_id_field = field.into();
        self
    }

    pub fn with_cluster_distance(mut self, px: f64) -> Self {
        self.cluster_distance = px;
        self
    }

    pub fn with_spiderfying_distance(mut self, px: f64) -> Self {
        self.spiderfying_distance = px;
        self
    }

    pub fn with_max_cluster_scale(mut self, scale: f64) -> Self {
        self.max_cluster_scale = scale;
        self
    }

    pub fn with_show_cluster_area(mut self, show: bool) -> Self {
        self.show_cluster_area = show;
        self
    }

    pub fn with_show_spiderfying(mut self, show: bool) -> Self {
        self.show_spiderfying = show;
        self
    }

    /// A limit of zero is rejected by [`ClusterConfig::validate`].
    pub fn with_return_limit(mut self, limit: usize) -> Self {
        self.return_limit = limit;
        self
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_zoom_on_click(mut self, zoom: bool) -> Self {
        self.zoom_on_click = zoom;
        self
    }

    pub fn with_where_clause(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.object_id_field.trim().is_empty() {
            return Err("Object id field must not be empty".to_string());
        }
        if !(self.cluster_distance.is_finite() && self.cluster_distance >= 0.0) {
            return Err(format!(
                "Cluster distance must be finite and non-negative, got: {}",
                self.cluster_distance
            ));
        }
        if !(self.spiderfying_distance.is_finite() && self.spiderfying_distance >= 0.0) {
            return Err(format!(
                "Spiderfying distance must be finite and non-negative, got: {}",
                self.spiderfying_distance
            ));
        }
        if !(self.max_cluster_scale.is_finite() && self.max_cluster_scale >= 0.0) {
            return Err(format!(
                "Max cluster scale must be finite and non-negative, got: {}",
                self.max_cluster_scale
            ));
        }
        if self.return_limit == 0 {
            return Err("Return limit must be greater than zero".to_string());
        }
        if self.cluster_distance > 10_000.0 {
            log::warn!(
                "Cluster distance of {} px exceeds any realistic viewport; everything will merge",
                self.cluster_distance
            );
        }
        self.layout.validate()
    }

    /// Validate into the crate error type.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(ClusterError::InvalidConfig)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: ClusterConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: ClusterConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            object_id_field: Self::default_object_id_field(),
            cluster_distance: Self::default_cluster_distance(),
            spiderfying_distance: Self::default_spiderfying_distance(),
            max_cluster_scale: 0.0,
            show_cluster_area: false,
            show_spiderfying: Self::default_show_spiderfying(),
            return_limit: Self::default_return_limit(),
            debounce_ms: 0,
            zoom_on_click: Self::default_zoom_on_click(),
            where_clause: None,
            layout: LayoutConfig::default(),
        }
    }
}
