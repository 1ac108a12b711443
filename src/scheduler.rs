//! Recluster scheduling: decide per view signal whether to do nothing, recluster the
//! cache, or fetch first and then recluster.
//!
//! ```text
//! notify(signal)          record the change, coalesce with pending work
//!      |
//! run_pending().await     defer (yield or debounce), then at most one cycle at a time
//!      |
//!      +-- view inside visited extent, nothing forced --> recluster cached features
//!      +-- otherwise --> per enabled leaf: ids -> new ids -> paged fetch -> absorb
//!                        (all layers joined before clustering)
//! ```
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an `.await`.

use crate::cache::FeatureCache;
use crate::cluster::Cluster;
use crate::config::ClusterConfig;
use crate::engine::{ClusteringEngine, PassParams, PassStats, select_tolerance};
use crate::error::{ClusterError, Result};
use crate::extent::{ExtentArea, VisitedExtent};
use crate::layers::{Sublayer, SublayerTree};
use crate::transport::{FeatureSource, ObjectIdQuery, fetch_features_paged};
use crate::types::{Feature, LayerId, ObjectId, ViewState};
use futures::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A viewport-affecting change reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewSignal {
    /// The view stopped moving at this state.
    ExtentStationary(ViewState),
    /// A sublayer (leaf or group) was shown or hidden.
    VisibilityChanged { layer_id: LayerId, visible: bool },
    /// The whole sublayer set was replaced.
    LayersChanged(Vec<Sublayer>),
    /// Drop every cached feature and fetch again, e.g. after a filter change.
    Reinit,
    /// Use these ids per layer instead of extent queries; `None` returns to extent queries.
    SetData(Option<FxHashMap<LayerId, Vec<ObjectId>>>),
}

/// What a call to [`ReclusterScheduler::run_pending`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing was pending, or no view state is known yet.
    Idle,
    /// Another cycle was in flight; the request was dropped.
    Skipped,
    /// Cached features were reclustered without touching the transport.
    Reclustered(PassStats),
    /// Features were fetched for the view and then clustered.
    Fetched(FetchReport),
}

/// Summary of a fetching cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub layers: usize,
    pub new_ids: usize,
    pub absorbed: usize,
    /// Layers whose fetch failed; their cached features were still clustered.
    pub failed_layers: Vec<LayerId>,
    /// The cached data was reset while this cycle was in flight; its results were
    /// discarded and the next cycle fetches again.
    pub superseded: bool,
    pub pass: PassStats,
}

#[derive(Debug, Clone, Copy, Default)]
struct Pending {
    force_fetch: bool,
}

impl Pending {
    fn merge(current: Option<Pending>, force_fetch: bool) -> Option<Pending> {
        Some(Pending {
            force_fetch: force_fetch || current.is_some_and(|p| p.force_fetch),
        })
    }
}

#[derive(Debug)]
struct SchedulerState {
    tree: SublayerTree,
    cache: FeatureCache,
    engine: ClusteringEngine,
    visited: VisitedExtent,
    view: Option<ViewState>,
    predefined: Option<FxHashMap<LayerId, Vec<ObjectId>>>,
    pending: Option<Pending>,
    /// A forcing signal arrived during a cycle; the next cycle must fetch.
    force_next: bool,
    /// Bumped on every data reset so an in-flight cycle can tell its plan is stale.
    generation: u64,
}

impl SchedulerState {
    fn reset_data(&mut self) {
        self.cache.init_layers(self.tree.leaf_ids());
        self.visited.reset();
        self.engine.clear();
        self.generation += 1;
    }
}

/// Rebuild draw candidates from cache, tolerating layers the cache does not know.
fn refresh_candidates(cache: &mut FeatureCache, layer_id: &str, area: &ExtentArea) -> usize {
    match cache.refresh_draw_candidates(layer_id, area) {
        Ok(n) => n,
        Err(err) => {
            log::debug!("Skipping draw candidate refresh: {}", err);
            0
        }
    }
}

struct LayerJob {
    layer_id: LayerId,
    title: Option<String>,
    predefined: Option<Vec<ObjectId>>,
}

#[derive(Default)]
struct LayerFetched {
    new_ids: usize,
    absorbed: usize,
}

/// Resets the in-progress flag when the cycle ends, however it ends.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the feature cache, the clustering engine and the visited extent of one layer,
/// and drives them from view signals.
pub struct ReclusterScheduler<S> {
    source: S,
    config: ClusterConfig,
    state: Mutex<SchedulerState>,
    in_progress: AtomicBool,
}

impl<S: FeatureSource> ReclusterScheduler<S> {
    pub fn new(source: S, config: ClusterConfig, tree: SublayerTree) -> Result<Self> {
        config.check()?;
        let mut cache = FeatureCache::new(config.object_id_field.clone());
        cache.init_layers(tree.leaf_ids());
        Ok(Self {
            source,
            config,
            state: Mutex::new(SchedulerState {
                tree,
                cache,
                engine: ClusteringEngine::new(),
                visited: VisitedExtent::new(),
                view: None,
                predefined: None,
                pending: None,
                force_next: false,
                generation: 0,
            }),
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Record a signal. Never blocks on the transport; the work runs in
    /// [`run_pending`](Self::run_pending).
    ///
    /// While a cycle is in flight the signal still updates the view, the layer tree and
    /// the cached data, but no follow-up cycle is queued for it.
    pub fn notify(&self, signal: ViewSignal) -> Result<()> {
        let busy = self.is_in_progress();
        let mut state = self.state.lock();

        let force_fetch = match signal {
            ViewSignal::ExtentStationary(view) => {
                view.validate()?;
                let area = ExtentArea::new(&view.extent, view.spatial_reference);
                let zoomed = state
                    .view
                    .as_ref()
                    .is_some_and(|prev| resolution_changed(prev.resolution(), view.resolution()));
                if !busy && (zoomed || !state.visited.contains(&area)) {
                    // stale aggregates must not linger at the new zoom
                    state.engine.clear();
                }
                state.view = Some(view);
                false
            }
            ViewSignal::VisibilityChanged { layer_id, visible } => {
                if !state.tree.set_visible(&layer_id, visible)? {
                    return Ok(());
                }
                visible
            }
            ViewSignal::LayersChanged(sublayers) => {
                state.tree = SublayerTree::new(sublayers)?;
                state.reset_data();
                true
            }
            ViewSignal::Reinit => {
                state.reset_data();
                true
            }
            ViewSignal::SetData(ids) => {
                state.predefined = ids;
                state.reset_data();
                true
            }
        };

        if busy {
            log::debug!("Cycle in progress, dropping recluster trigger (force: {})", force_fetch);
            state.force_next |= force_fetch;
        } else {
            state.pending = Pending::merge(state.pending, force_fetch);
        }
        Ok(())
    }

    /// Absorb features pushed by the host for `layer_id` and queue a recluster.
    pub fn absorb_features(&self, layer_id: &str, features: Vec<Feature>) -> Result<usize> {
        let mut state = self.state.lock();
        let view = state
            .view
            .clone()
            .ok_or_else(|| ClusterError::InvalidInput("No view state set".to_string()))?;
        let area = ExtentArea::new(&view.extent, view.spatial_reference);
        if !state.cache.has_layer(layer_id) {
            return Err(ClusterError::UnknownLayer(layer_id.to_string()));
        }
        let title = state.tree.get(layer_id).and_then(|l| l.title.clone());

        let ids: Vec<ObjectId> = features
            .iter()
            .filter_map(|f| f.object_id(&self.config.object_id_field))
            .collect();
        state.cache.register_fetched_object_ids(layer_id, &ids);
        let stats = state
            .cache
            .absorb(layer_id, title.as_deref(), features, &area)?;
        state.pending = Pending::merge(state.pending, false);
        Ok(stats.inserted + stats.replaced)
    }

    /// Run the pending work, if any.
    ///
    /// Work is deferred first (one scheduler turn, or `debounce_ms`) so bursts of
    /// signals collapse into one cycle. At most one cycle runs at a time.
    pub async fn run_pending(&self) -> CycleOutcome {
        if self.is_in_progress() {
            return CycleOutcome::Skipped;
        }

        let debounce = self.config.debounce();
        if debounce.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(debounce).await;
        }

        let Some(_guard) = InProgressGuard::acquire(&self.in_progress) else {
            return CycleOutcome::Skipped;
        };

        let (pending, view) = {
            let mut state = self.state.lock();
            let Some(view) = state.view.clone() else {
                if state.pending.is_some() {
                    log::debug!("No view state yet, keeping work pending");
                }
                return CycleOutcome::Idle;
            };
            match state.pending.take() {
                Some(mut pending) => {
                    pending.force_fetch |= std::mem::take(&mut state.force_next);
                    (pending, view)
                }
                None => return CycleOutcome::Idle,
            }
        };

        self.run_cycle(pending, view).await
    }

    async fn run_cycle(&self, pending: Pending, view: ViewState) -> CycleOutcome {
        let area = ExtentArea::new(&view.extent, view.spatial_reference);
        let params = self.pass_params(&view);

        let (jobs, generation) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !pending.force_fetch && state.visited.contains(&area) {
                log::debug!("View inside visited extent, reclustering cached features");
                for layer in state.tree.enabled_leaves() {
                    refresh_candidates(&mut state.cache, &layer.id, &area);
                }
                state.engine.cluster(&state.tree, &state.cache, &area, &params);
                return CycleOutcome::Reclustered(state.engine.stats());
            }

            let jobs = state
                .tree
                .enabled_leaves()
                .map(|layer| LayerJob {
                    layer_id: layer.id.clone(),
                    title: layer.title.clone(),
                    predefined: state
                        .predefined
                        .as_ref()
                        .map(|ids| ids.get(&layer.id).cloned().unwrap_or_default()),
                })
                .collect::<Vec<_>>();
            (jobs, state.generation)
        };

        let query = ObjectIdQuery {
            extents: area.rects().to_vec(),
            spatial_reference: view.spatial_reference,
            where_clause: self.config.where_clause.clone(),
        };
        log::debug!("Fetching {} layers for the current view", jobs.len());

        let results = join_all(
            jobs.iter()
                .map(|job| self.fetch_layer(job, &query, &area, generation)),
        )
        .await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut report = FetchReport {
            layers: jobs.len(),
            ..FetchReport::default()
        };
        if state.generation != generation {
            log::debug!("Data was reset during the fetch, discarding cycle results");
            state.force_next = true;
            report.superseded = true;
            return CycleOutcome::Fetched(report);
        }
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    report.new_ids += fetched.new_ids;
                    report.absorbed += fetched.absorbed;
                }
                Err(err) => {
                    log::error!("Fetch for layer {} failed: {}", job.layer_id, err);
                    refresh_candidates(&mut state.cache, &job.layer_id, &area);
                    report.failed_layers.push(job.layer_id.clone());
                }
            }
        }

        if report.failed_layers.is_empty() {
            state.visited.extend(&area);
        }
        state.engine.cluster(&state.tree, &state.cache, &area, &params);
        report.pass = state.engine.stats();
        log::debug!(
            "Fetch cycle: {} new ids, {} features absorbed, {} clusters",
            report.new_ids,
            report.absorbed,
            report.pass.clusters
        );
        CycleOutcome::Fetched(report)
    }

    /// Fetch one layer. Cache writes are skipped once `generation` is outdated, so a
    /// reset during the fetch leaves the fresh cache untouched.
    async fn fetch_layer(
        &self,
        job: &LayerJob,
        query: &ObjectIdQuery,
        area: &ExtentArea,
        generation: u64,
    ) -> Result<LayerFetched> {
        let ids = match &job.predefined {
            Some(ids) => ids.clone(),
            None => self.source.query_object_ids(&job.layer_id, query).await?,
        };
        let new_ids = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Ok(LayerFetched::default());
            }
            state
                .cache
                .register_fetched_object_ids(&job.layer_id, &ids)
        };

        let features = match fetch_features_paged(
            &self.source,
            &job.layer_id,
            &new_ids,
            self.config.return_limit,
        )
        .await
        {
            Ok(features) => features,
            Err(err) => {
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.cache.release_object_ids(&job.layer_id, &new_ids);
                }
                return Err(err);
            }
        };

        let mut state = self.state.lock();
        if state.generation != generation {
            return Ok(LayerFetched::default());
        }
        let stats = state.cache.absorb(
            &job.layer_id,
            job.title.as_deref(),
            features,
            area,
        )?;
        Ok(LayerFetched {
            new_ids: new_ids.len(),
            absorbed: stats.inserted + stats.replaced,
        })
    }

    fn pass_params(&self, view: &ViewState) -> PassParams {
        PassParams {
            tolerance: select_tolerance(
                self.config.cluster_distance,
                self.config.max_cluster_scale,
                view.scale,
            ),
            resolution: view.resolution(),
            spiderfying_distance: self
                .config
                .show_spiderfying
                .then_some(self.config.spiderfying_distance),
        }
    }

    pub fn view(&self) -> Option<ViewState> {
        self.state.lock().view.clone()
    }

    /// Snapshot of the clusters of the last pass.
    pub fn clusters(&self) -> Vec<Cluster> {
        self.state.lock().engine.clusters().to_vec()
    }

    /// Run `f` over the clusters of the last pass without copying them.
    pub fn with_clusters<R>(&self, f: impl FnOnce(&[Cluster]) -> R) -> R {
        f(self.state.lock().engine.clusters())
    }

    pub fn find_cluster(&self, cluster_id: usize, cluster_count: usize) -> Option<Cluster> {
        self.state
            .lock()
            .engine
            .find(cluster_id, cluster_count)
            .cloned()
    }

    /// Number of cached features across all layers.
    pub fn cached_features(&self) -> usize {
        self.state.lock().cache.total_len()
    }

    pub fn is_layer_enabled(&self, layer_id: &str) -> bool {
        self.state.lock().tree.is_enabled(layer_id)
    }

    /// Titles of every leaf layer, in registration order.
    pub fn layer_titles(&self) -> FxHashMap<LayerId, Option<String>> {
        self.state
            .lock()
            .tree
            .leaves()
            .map(|l| (l.id.clone(), l.title.clone()))
            .collect()
    }
}

fn resolution_changed(previous: f64, current: f64) -> bool {
    (previous - current).abs() > f64::EPSILON * previous.abs().max(current.abs())
}
