//! GeoJSON interchange for features and clusters.

use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::types::{Feature, FeatureGeometry};
use geo::{Coord, LineString, Point, Polygon};
use geojson::{FeatureCollection, Geometry, Value};
use serde_json::Map;

/// Parse a FeatureCollection into features. Properties become attributes.
///
/// Point and Polygon geometries are supported; a feature without geometry is kept
/// (it is cached but never drawn).
pub fn features_from_geojson(geojson: &str) -> Result<Vec<Feature>> {
    let collection: FeatureCollection = serde_json::from_str(geojson)
        .map_err(|e| ClusterError::InvalidInput(format!("Failed to parse GeoJSON: {}", e)))?;

    collection
        .features
        .into_iter()
        .map(|feature| {
            let geometry = feature.geometry.map(geometry_from_geojson).transpose()?;
            Ok(Feature::new(geometry, feature.properties.unwrap_or_default()))
        })
        .collect()
}

fn geometry_from_geojson(geometry: Geometry) -> Result<FeatureGeometry> {
    match geometry.value {
        Value::Point(coords) => Ok(FeatureGeometry::Point(Point::from(position(&coords)?))),
        Value::Polygon(rings) => {
            let mut rings = rings
                .iter()
                .map(|ring| {
                    ring.iter()
                        .map(|c| position(c))
                        .collect::<Result<Vec<_>>>()
                        .map(LineString::from)
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter();
            let exterior = rings.next().ok_or_else(|| {
                ClusterError::InvalidInput("Polygon must have at least one ring".to_string())
            })?;
            Ok(FeatureGeometry::Polygon(Polygon::new(exterior, rings.collect())))
        }
        _ => Err(ClusterError::InvalidInput(
            "Only Point and Polygon geometries are supported".to_string(),
        )),
    }
}

fn position(coords: &[f64]) -> Result<Coord> {
    if coords.len() < 2 {
        return Err(ClusterError::InvalidInput(
            "Coordinate must have at least 2 values".to_string(),
        ));
    }
    Ok(Coord {
        x: coords[0],
        y: coords[1],
    })
}

/// One Point feature per cluster, located at the centroid, with the cluster summary
/// as properties.
pub fn clusters_to_geojson(clusters: &[Cluster], object_id_field: &str) -> Result<String> {
    let features = clusters
        .iter()
        .map(|cluster| {
            let properties = match serde_json::to_value(cluster.summary(object_id_field))? {
                serde_json::Value::Object(map) => map,
                _ => Map::new(),
            };
            Ok(geojson::Feature {
                bbox: Some(cluster.extent().to_vec()),
                geometry: Some(Geometry::new(Value::Point(vec![cluster.x(), cluster.y()]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    serde_json::to_string(&collection).map_err(|e| {
        ClusterError::Serialization(format!("Failed to serialize clusters: {}", e))
    })
}
