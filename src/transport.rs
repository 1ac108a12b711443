//! Feature transport abstraction.
//!
//! The engine never talks to a feature service directly. A host supplies a
//! [`FeatureSource`] that answers two questions per layer: which object ids match the
//! current view, and what are the full features for a set of ids. [`MemorySource`]
//! answers both from an in-process store.

use crate::error::{ClusterError, Result};
use crate::types::{Feature, LayerId, ObjectId, SpatialReference};
use futures::future::try_join_all;
use geo::{Intersects, Rect};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Object-id query for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectIdQuery {
    /// Normalized view extents; a feature matches if it lies in any of them.
    pub extents: Vec<Rect>,
    pub spatial_reference: SpatialReference,
    /// Optional attribute filter, passed through to the service verbatim.
    pub where_clause: Option<String>,
}

/// Remote feature service seen from the engine.
///
/// Implementations are awaited from a single logical thread, so the returned futures
/// need not be `Send`.
pub trait FeatureSource {
    /// Object ids of `layer_id` matching `query`.
    fn query_object_ids(
        &self,
        layer_id: &str,
        query: &ObjectIdQuery,
    ) -> impl Future<Output = Result<Vec<ObjectId>>>;

    /// Full features for `ids`. Callers keep `ids` within the service page size.
    fn query_features_by_ids(
        &self,
        layer_id: &str,
        ids: &[ObjectId],
    ) -> impl Future<Output = Result<Vec<Feature>>>;
}

/// Fetch `ids` in pages of at most `return_limit`, concurrently, preserving page order.
///
/// Any failed page fails the whole layer fetch.
pub async fn fetch_features_paged<S: FeatureSource>(
    source: &S,
    layer_id: &str,
    ids: &[ObjectId],
    return_limit: usize,
) -> Result<Vec<Feature>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    if return_limit == 0 {
        return Err(ClusterError::InvalidInput(
            "Return limit must be greater than zero".to_string(),
        ));
    }

    let pages = ids
        .chunks(return_limit)
        .map(|page| source.query_features_by_ids(layer_id, page));
    let results = try_join_all(pages).await?;
    Ok(results.into_iter().flatten().collect())
}

/// Request counters of a [`MemorySource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub object_id_queries: u64,
    pub feature_queries: u64,
    pub features_returned: u64,
}

/// In-process feature source keyed by layer and object id.
///
/// Where-clauses are not evaluated; queries match on extent only.
#[derive(Debug)]
pub struct MemorySource {
    object_id_field: String,
    layers: RwLock<FxHashMap<LayerId, Vec<Feature>>>,
    failing: RwLock<FxHashSet<LayerId>>,
    object_id_queries: AtomicU64,
    feature_queries: AtomicU64,
    features_returned: AtomicU64,
}

impl MemorySource {
    pub fn new(object_id_field: impl Into<String>) -> Self {
        Self {
            object_id_field: object_id_field.into(),
            layers: RwLock::new(FxHashMap::default()),
            failing: RwLock::new(FxHashSet::default()),
            object_id_queries: AtomicU64::new(0),
            feature_queries: AtomicU64::new(0),
            features_returned: AtomicU64::new(0),
        }
    }

    /// Add features to a layer, creating it if needed.
    pub fn insert(&self, layer_id: &str, features: impl IntoIterator<Item = Feature>) {
        self.layers
            .write()
            .entry(layer_id.to_string())
            .or_default()
            .extend(features);
    }

    /// Make every query against `layer_id` fail (or succeed again).
    pub fn set_failing(&self, layer_id: &str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(layer_id.to_string());
        } else {
            set.remove(layer_id);
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            object_id_queries: self.object_id_queries.load(Ordering::Relaxed),
            feature_queries: self.feature_queries.load(Ordering::Relaxed),
            features_returned: self.features_returned.load(Ordering::Relaxed),
        }
    }

    fn check_layer(&self, layer_id: &str) -> Result<()> {
        if self.failing.read().contains(layer_id) {
            return Err(ClusterError::transport(layer_id, "layer is unavailable"));
        }
        if !self.layers.read().contains_key(layer_id) {
            return Err(ClusterError::transport(layer_id, "layer does not exist"));
        }
        Ok(())
    }
}

impl FeatureSource for MemorySource {
    async fn query_object_ids(&self, layer_id: &str, query: &ObjectIdQuery) -> Result<Vec<ObjectId>> {
        self.object_id_queries.fetch_add(1, Ordering::Relaxed);
        self.check_layer(layer_id)?;

        let layers = self.layers.read();
        let features = layers.get(layer_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(features
            .iter()
            .filter(|f| {
                f.location()
                    .is_some_and(|p| query.extents.iter().any(|r| r.intersects(&p)))
            })
            .filter_map(|f| f.object_id(&self.object_id_field))
            .collect())
    }

    async fn query_features_by_ids(&self, layer_id: &str, ids: &[ObjectId]) -> Result<Vec<Feature>> {
        self.feature_queries.fetch_add(1, Ordering::Relaxed);
        self.check_layer(layer_id)?;

        let wanted: FxHashSet<&ObjectId> = ids.iter().collect();
        let layers = self.layers.read();
        let features: Vec<Feature> = layers
            .get(layer_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|f| {
                f.object_id(&self.object_id_field)
                    .is_some_and(|id| wanted.contains(&id))
            })
            .cloned()
            .collect();
        self.features_returned
            .fetch_add(features.len() as u64, Ordering::Relaxed);
        Ok(features)
    }
}
