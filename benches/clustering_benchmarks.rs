use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use featurecluster::extent::ExtentArea;
use featurecluster::projection::project_clusters;
use featurecluster::{
    ClusteringEngine, Feature, FeatureCache, LayoutConfig, ObjectId, PassParams, SpatialReference,
    Sublayer, SublayerTree, ViewState,
};
use geo::{Rect, coord};
use serde_json::{Map, json};
use std::sync::Arc;

fn features(n: usize) -> Vec<Feature> {
    (0..n)
        .map(|i| {
            let mut attrs = Map::new();
            attrs.insert("objectid".to_string(), json!(i));
            // a loose grid with a few dense blocks
            let x = (i % 100) as f64 * 10.0 + if i % 7 == 0 { 0.0 } else { (i % 13) as f64 };
            let y = (i / 100) as f64 * 10.0;
            Feature::point(x, y, attrs)
        })
        .collect()
}

fn view() -> ViewState {
    ViewState::new(
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1000.0, y: 1000.0 }),
        1000.0,
        1000.0,
    )
    .with_spatial_reference(SpatialReference::new(25832))
}

fn benchmark_clustering_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering_pass");
    let view = view();
    let area = ExtentArea::new(&view.extent, view.spatial_reference);

    for size in [1_000, 10_000] {
        let input: Vec<Arc<Feature>> = features(size).into_iter().map(Arc::new).collect();
        for tolerance in [0.0, 20.0, 100.0] {
            let params = PassParams {
                tolerance,
                resolution: view.resolution(),
                spiderfying_distance: Some(1.0),
            };
            group.bench_with_input(
                BenchmarkId::new(format!("tolerance_{}", tolerance), size),
                &input,
                |b, input| {
                    let mut engine = ClusteringEngine::new();
                    b.iter(|| engine.cluster_features(black_box(input), &area, &params).len())
                },
            );
        }
    }

    group.finish();
}

fn benchmark_cache_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_operations");
    let view = view();
    let area = ExtentArea::new(&view.extent, view.spatial_reference);

    group.bench_function("absorb_10k", |b| {
        b.iter(|| {
            let mut cache = FeatureCache::new("objectid");
            cache.init_layers(["poi"]);
            cache
                .absorb("poi", None, black_box(features(10_000)), &area)
                .unwrap()
        })
    });

    let ids: Vec<ObjectId> = (0..10_000).map(ObjectId::Int).collect();
    group.bench_function("register_object_ids_10k", |b| {
        b.iter(|| {
            let mut cache = FeatureCache::new("objectid");
            cache.init_layers(["poi"]);
            cache.register_fetched_object_ids("poi", black_box(&ids))
        })
    });

    group.finish();
}

fn benchmark_full_pass_and_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    let view = view();
    let area = ExtentArea::new(&view.extent, view.spatial_reference);
    let tree = SublayerTree::new(vec![Sublayer::new("poi")]).unwrap();
    let mut cache = FeatureCache::new("objectid");
    cache.init_layers(tree.leaf_ids());
    cache.absorb("poi", None, features(10_000), &area).unwrap();
    let params = PassParams {
        tolerance: 50.0,
        resolution: view.resolution(),
        spiderfying_distance: Some(1.0),
    };
    let layout = LayoutConfig::default();

    group.bench_function("cluster_and_project_10k", |b| {
        let mut engine = ClusteringEngine::new();
        b.iter(|| {
            let clusters = engine.cluster(&tree, &cache, &area, &params);
            project_clusters(black_box(clusters), &view, &layout).len()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_clustering_pass,
    benchmark_cache_operations,
    benchmark_full_pass_and_projection
);
criterion_main!(benches);
