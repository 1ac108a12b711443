//! Per-layer feature store and incremental fetch deduplication.
//!
//! The feature store is append-only: every feature ever fetched for a layer stays
//! cached for the lifetime of the store (until `init_layers` resets the layer), so a
//! viewport that returns to an earlier area can be redrawn without a network round trip.
//! The draw-candidate list is the per-layer subset handed to the clustering pass.

use crate::error::{ClusterError, Result};
use crate::extent::ExtentArea;
use crate::types::{Feature, LayerId, ObjectId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Every object id ever requested, per layer, in request order.
#[derive(Debug, Clone, Default)]
pub struct ObjectIdCache {
    layers: FxHashMap<LayerId, SeenIds>,
}

#[derive(Debug, Clone, Default)]
struct SeenIds {
    ordered: Vec<ObjectId>,
    seen: FxHashSet<ObjectId>,
}

impl ObjectIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ids` as seen and return only those never seen before, in input order.
    /// Duplicates inside `ids` are reported once.
    pub fn difference(&mut self, layer_id: &str, ids: &[ObjectId]) -> Vec<ObjectId> {
        let entry = self.layers.entry(layer_id.to_string()).or_default();
        let mut fresh = Vec::new();
        for id in ids {
            if entry.seen.insert(id.clone()) {
                entry.ordered.push(id.clone());
                fresh.push(id.clone());
            }
        }
        fresh
    }

    /// Forget ids whose fetch never completed so the next cycle requests them again.
    pub fn release(&mut self, layer_id: &str, ids: &[ObjectId]) {
        let Some(entry) = self.layers.get_mut(layer_id) else {
            return;
        };
        let released: FxHashSet<&ObjectId> = ids.iter().collect();
        entry.ordered.retain(|id| !released.contains(id));
        for id in ids {
            entry.seen.remove(id);
        }
    }

    pub fn get(&self, layer_id: &str) -> &[ObjectId] {
        self.layers
            .get(layer_id)
            .map(|e| e.ordered.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, layer_id: &str, id: &ObjectId) -> bool {
        self.layers
            .get(layer_id)
            .is_some_and(|e| e.seen.contains(id))
    }

    pub fn clear_layer(&mut self, layer_id: &str) {
        self.layers.remove(layer_id);
    }
}

#[derive(Debug, Default)]
struct LayerStore {
    features: Vec<Arc<Feature>>,
    index: FxHashMap<ObjectId, usize>,
    draw_candidates: Vec<Arc<Feature>>,
}

impl LayerStore {
    fn cached_in(&self, area: &ExtentArea) -> impl Iterator<Item = &Arc<Feature>> {
        self.features
            .iter()
            .filter(|f| f.location().is_some_and(|p| area.contains_point(&p)))
    }
}

/// Outcome of absorbing one batch of fetched features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsorbStats {
    /// Features keyed into the cache for the first time.
    pub inserted: usize,
    /// Features whose id was already cached; the newer copy replaces the old one.
    pub replaced: usize,
    /// Features dropped because they carry no usable object id.
    pub skipped: usize,
    /// Length of the recomputed draw-candidate list.
    pub draw_candidates: usize,
}

/// Identity-keyed store of fetched features, one partition per source layer.
#[derive(Debug)]
pub struct FeatureCache {
    object_id_field: String,
    layers: FxHashMap<LayerId, LayerStore>,
    object_ids: ObjectIdCache,
}

impl FeatureCache {
    pub fn new(object_id_field: impl Into<String>) -> Self {
        Self {
            object_id_field: object_id_field.into(),
            layers: FxHashMap::default(),
            object_ids: ObjectIdCache::new(),
        }
    }

    pub fn object_id_field(&self) -> &str {
        &self.object_id_field
    }

    /// Reset the store, the draw candidates and the seen-id record of each layer.
    pub fn init_layers<I, S>(&mut self, layer_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<LayerId>,
    {
        for layer_id in layer_ids {
            let layer_id = layer_id.into();
            self.object_ids.clear_layer(&layer_id);
            self.layers.insert(layer_id, LayerStore::default());
        }
    }

    pub fn has_layer(&self, layer_id: &str) -> bool {
        self.layers.contains_key(layer_id)
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &LayerId> {
        self.layers.keys()
    }

    /// Set difference between `ids` and every id previously seen for the layer.
    ///
    /// The returned ids are the minimal request the transport has to make. All of
    /// `ids` are recorded, so asking twice for the same ids yields nothing new.
    pub fn register_fetched_object_ids(
        &mut self,
        layer_id: &str,
        ids: &[ObjectId],
    ) -> Vec<ObjectId> {
        self.object_ids.difference(layer_id, ids)
    }

    /// Undo the registration of ids whose features never arrived.
    pub fn release_object_ids(&mut self, layer_id: &str, ids: &[ObjectId]) {
        self.object_ids.release(layer_id, ids);
    }

    pub fn object_id_cache(&self) -> &ObjectIdCache {
        &self.object_ids
    }

    /// Key `fetched` into the layer's store and recompute its draw candidates as the
    /// fetched features followed by previously cached features inside `area`.
    pub fn absorb(
        &mut self,
        layer_id: &str,
        layer_title: Option<&str>,
        fetched: Vec<Feature>,
        area: &ExtentArea,
    ) -> Result<AbsorbStats> {
        let field = self.object_id_field.as_str();
        let store = self
            .layers
            .get_mut(layer_id)
            .ok_or_else(|| ClusterError::UnknownLayer(layer_id.to_string()))?;

        let mut stats = AbsorbStats::default();
        let mut fresh = Vec::with_capacity(fetched.len());
        let mut fresh_ids = FxHashSet::default();

        for mut feature in fetched {
            let Some(id) = feature.object_id(field) else {
                log::warn!(
                    "Skipping feature without '{}' attribute in layer {}",
                    field,
                    layer_id
                );
                stats.skipped += 1;
                continue;
            };
            feature.tag_layer(layer_id, layer_title);
            let feature = Arc::new(feature);

            match store.index.get(&id) {
                Some(&slot) => {
                    store.features[slot] = Arc::clone(&feature);
                    stats.replaced += 1;
                }
                None => {
                    store.index.insert(id.clone(), store.features.len());
                    store.features.push(Arc::clone(&feature));
                    stats.inserted += 1;
                }
            }
            if fresh_ids.insert(id) {
                fresh.push(feature);
            }
        }

        let cached: Vec<Arc<Feature>> = store
            .cached_in(area)
            .filter(|f| {
                f.object_id(field)
                    .is_some_and(|id| !fresh_ids.contains(&id))
            })
            .cloned()
            .collect();
        fresh.extend(cached);
        store.draw_candidates = fresh;
        stats.draw_candidates = store.draw_candidates.len();

        log::debug!(
            "Absorbed {} new / {} replaced features into layer {} ({} draw candidates)",
            stats.inserted,
            stats.replaced,
            layer_id,
            stats.draw_candidates
        );
        Ok(stats)
    }

    /// Rebuild the draw candidates purely from cache hits inside `area`.
    pub fn refresh_draw_candidates(&mut self, layer_id: &str, area: &ExtentArea) -> Result<usize> {
        let store = self
            .layers
            .get_mut(layer_id)
            .ok_or_else(|| ClusterError::UnknownLayer(layer_id.to_string()))?;
        store.draw_candidates = store.cached_in(area).cloned().collect();
        Ok(store.draw_candidates.len())
    }

    /// Current draw candidates; empty for unknown layers.
    pub fn draw_candidates(&self, layer_id: &str) -> &[Arc<Feature>] {
        self.layers
            .get(layer_id)
            .map(|s| s.draw_candidates.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, layer_id: &str, id: &ObjectId) -> Option<&Arc<Feature>> {
        let store = self.layers.get(layer_id)?;
        store.index.get(id).map(|&slot| &store.features[slot])
    }

    /// Number of cached features for the layer.
    pub fn len(&self, layer_id: &str) -> usize {
        self.layers.get(layer_id).map_or(0, |s| s.features.len())
    }

    pub fn total_len(&self) -> usize {
        self.layers.values().map(|s| s.features.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpatialReference;
    use geo::{Rect, coord};
    use serde_json::{Map, json};

    fn feature(id: i64, x: f64, y: f64) -> Feature {
        let mut attrs = Map::new();
        attrs.insert("objectid".to_string(), json!(id));
        Feature::point(x, y, attrs)
    }

    fn area(x0: f64, y0: f64, x1: f64, y1: f64) -> ExtentArea {
        ExtentArea::new(
            &Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }),
            SpatialReference::new(25832),
        )
    }

    fn ids(raw: &[i64]) -> Vec<ObjectId> {
        raw.iter().map(|&i| ObjectId::Int(i)).collect()
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut cache = FeatureCache::new("objectid");
        let first = cache.register_fetched_object_ids("a", &ids(&[1, 2, 3]));
        assert_eq!(first, ids(&[1, 2, 3]));
        let second = cache.register_fetched_object_ids("a", &ids(&[1, 2, 3]));
        assert!(second.is_empty());
        let third = cache.register_fetched_object_ids("a", &ids(&[3, 4, 4]));
        assert_eq!(third, ids(&[4]));
        assert_eq!(cache.object_id_cache().get("a"), ids(&[1, 2, 3, 4]).as_slice());
        // layers are independent
        assert_eq!(cache.register_fetched_object_ids("b", &ids(&[1])), ids(&[1]));
    }

    #[test]
    fn test_release_allows_refetch() {
        let mut cache = FeatureCache::new("objectid");
        cache.register_fetched_object_ids("a", &ids(&[1, 2]));
        cache.release_object_ids("a", &ids(&[2]));
        assert!(!cache.object_id_cache().contains("a", &ObjectId::Int(2)));
        assert_eq!(cache.register_fetched_object_ids("a", &ids(&[1, 2])), ids(&[2]));
    }

    #[test]
    fn test_absorb_unknown_layer() {
        let mut cache = FeatureCache::new("objectid");
        let err = cache.absorb("nope", None, vec![], &area(0.0, 0.0, 1.0, 1.0));
        assert_eq!(err, Err(ClusterError::UnknownLayer("nope".to_string())));
    }

    #[test]
    fn test_absorb_tags_and_keys_features() {
        let mut cache = FeatureCache::new("objectid");
        cache.init_layers(["a"]);
        let stats = cache
            .absorb(
                "a",
                Some("Schools"),
                vec![feature(1, 1.0, 1.0), feature(2, 2.0, 2.0)],
                &area(0.0, 0.0, 10.0, 10.0),
            )
            .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.draw_candidates, 2);

        let cached = cache.get("a", &ObjectId::Int(1)).unwrap();
        assert_eq!(cached.layer_id(), "a");
        assert_eq!(cached.layer_title(), Some("Schools"));
        assert_eq!(cache.len("a"), 2);
    }

    #[test]
    fn test_cached_features_reenter_draw_candidates() {
        let mut cache = FeatureCache::new("objectid");
        cache.init_layers(["a"]);

        // First view: fetch feature 1 at the west side.
        cache
            .absorb("a", None, vec![feature(1, 1.0, 1.0)], &area(0.0, 0.0, 10.0, 10.0))
            .unwrap();

        // Pan east: feature 2 is new, feature 1 is out of view.
        let east = area(50.0, 0.0, 60.0, 10.0);
        let stats = cache
            .absorb("a", None, vec![feature(2, 55.0, 5.0)], &east)
            .unwrap();
        assert_eq!(stats.draw_candidates, 1);

        // Pan back west with nothing new fetched: feature 1 comes back from cache.
        let west = area(0.0, 0.0, 10.0, 10.0);
        let stats = cache.absorb("a", None, vec![], &west).unwrap();
        assert_eq!(stats.draw_candidates, 1);
        assert_eq!(
            cache.draw_candidates("a")[0].object_id("objectid"),
            Some(ObjectId::Int(1))
        );

        // A recluster-only refresh over both areas sees both.
        let n = cache
            .refresh_draw_candidates("a", &area(0.0, 0.0, 60.0, 10.0))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(cache.total_len(), 2);
    }

    #[test]
    fn test_absorb_orders_fresh_before_cached_without_duplicates() {
        let mut cache = FeatureCache::new("objectid");
        cache.init_layers(["a"]);
        let view = area(0.0, 0.0, 10.0, 10.0);
        cache
            .absorb("a", None, vec![feature(1, 1.0, 1.0), feature(2, 2.0, 2.0)], &view)
            .unwrap();
        let stats = cache
            .absorb("a", None, vec![feature(3, 3.0, 3.0), feature(2, 2.5, 2.5)], &view)
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.replaced, 1);

        let order: Vec<_> = cache
            .draw_candidates("a")
            .iter()
            .map(|f| f.object_id("objectid"))
            .collect();
        assert_eq!(
            order,
            vec![
                Some(ObjectId::Int(3)),
                Some(ObjectId::Int(2)),
                Some(ObjectId::Int(1))
            ]
        );
        // the replacement copy wins
        let two = cache.get("a", &ObjectId::Int(2)).unwrap();
        assert_eq!(two.location().unwrap().x(), 2.5);
    }

    #[test]
    fn test_absorb_skips_features_without_id() {
        let mut cache = FeatureCache::new("objectid");
        cache.init_layers(["a"]);
        let stats = cache
            .absorb(
                "a",
                None,
                vec![Feature::point(1.0, 1.0, Map::new())],
                &area(0.0, 0.0, 10.0, 10.0),
            )
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.draw_candidates, 0);
        assert_eq!(cache.len("a"), 0);
    }

    #[test]
    fn test_init_layers_resets_store_and_seen_ids() {
        let mut cache = FeatureCache::new("objectid");
        cache.init_layers(["a"]);
        cache.register_fetched_object_ids("a", &ids(&[1]));
        cache
            .absorb("a", None, vec![feature(1, 1.0, 1.0)], &area(0.0, 0.0, 10.0, 10.0))
            .unwrap();

        cache.init_layers(["a"]);
        assert_eq!(cache.len("a"), 0);
        assert!(cache.draw_candidates("a").is_empty());
        assert_eq!(cache.register_fetched_object_ids("a", &ids(&[1])), ids(&[1]));
    }
}
