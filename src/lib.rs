//! Incremental spatial clustering of server-hosted features for interactive maps.
//!
//! Features are fetched per view from a [`FeatureSource`], cached by object id, and
//! grouped into screen-space clusters on every view change. Views already covered by
//! earlier fetches are reclustered from the cache without touching the source.
//!
//! ```rust
//! use featurecluster::prelude::*;
//! use geo::{Rect, coord};
//! use serde_json::{Map, json};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let source = MemorySource::new("objectid");
//! let mut attrs = Map::new();
//! attrs.insert("objectid".to_string(), json!(1));
//! source.insert("poi", vec![Feature::point(10.0, 10.0, attrs)]);
//!
//! let layer = ClusterLayerBuilder::new()
//!     .sublayer(Sublayer::new("poi"))
//!     .build(source)?;
//!
//! let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 100.0 });
//! layer.set_view_state(ViewState::new(extent, 100.0, 100.0))?;
//! layer.run_pending().await;
//! assert_eq!(layer.clusters().len(), 1);
//! # Ok::<(), featurecluster::ClusterError>(())
//! # }).unwrap();
//! ```

pub mod cache;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod extent;
pub mod geometry;
pub mod interaction;
pub mod layer;
pub mod layers;
pub mod projection;
pub mod scheduler;
pub mod transport;
pub mod types;

#[cfg(feature = "geojson")]
pub mod geojson;

pub use cache::{AbsorbStats, FeatureCache, ObjectIdCache};
pub use cluster::{Cluster, ClusterSummary};
pub use config::{ClusterConfig, LayoutConfig};
pub use engine::{ClusteringEngine, PassParams, PassStats, select_tolerance};
pub use error::{ClusterError, Result};
pub use extent::{ExtentArea, NormalizedExtents, VisitedExtent, normalize_extent};
pub use interaction::{ClusterEvent, EventBus, ZoomAction};
pub use layer::{ClusterLayer, ClusterLayerBuilder};
pub use layers::{Sublayer, SublayerTree};
pub use projection::{Graphic, GridCell, SpiderLeg, project_clusters};
pub use scheduler::{CycleOutcome, FetchReport, ReclusterScheduler, ViewSignal};
pub use transport::{FeatureSource, MemorySource, ObjectIdQuery, SourceStats, fetch_features_paged};
pub use types::{Feature, FeatureGeometry, LayerId, ObjectId, SpatialReference, ViewState};

#[cfg(feature = "geojson")]
pub use crate::geojson::{clusters_to_geojson, features_from_geojson};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{ClusterConfig, ClusterError, ClusterLayer, ClusterLayerBuilder, Result};

    pub use crate::{Cluster, Feature, ObjectId, SpatialReference, Sublayer, ViewState};

    pub use crate::{CycleOutcome, ViewSignal};

    pub use crate::{FeatureSource, MemorySource, ObjectIdQuery};

    pub use crate::{ClusterEvent, Graphic, ZoomAction};
}
