//! View extent normalization and the visited-extent union.
//!
//! A view that straddles the antimeridian is split into at most two rectangles that
//! lie inside the world bounds of the spatial reference. Both the per-pass
//! containment test and the visited-extent bookkeeping work on the normalized form.

use crate::types::SpatialReference;
use geo::{BooleanOps, Intersects, MultiPolygon, Point, Rect, Relate, coord};
use smallvec::{SmallVec, smallvec};

/// Up to two rectangles covering a normalized view extent.
pub type NormalizedExtents = SmallVec<[Rect; 2]>;

/// Normalize `extent` for `spatial_reference`.
///
/// For references that wrap (WGS84, Web Mercator) the extent is shifted by whole world
/// widths so its west edge lies in `[-half, half)`. If it then crosses the east edge it
/// is split in two; if it is at least a world wide it collapses to the full world.
/// Non-wrapping references return the extent unchanged.
pub fn normalize_extent(extent: &Rect, spatial_reference: SpatialReference) -> NormalizedExtents {
    let Some(world) = spatial_reference.world_width() else {
        return smallvec![*extent];
    };
    let half = world / 2.0;
    let (min, max) = (extent.min(), extent.max());

    if max.x - min.x >= world {
        return smallvec![Rect::new(
            coord! { x: -half, y: min.y },
            coord! { x: half, y: max.y },
        )];
    }

    let shift = ((min.x + half) / world).floor() * world;
    let (xmin, xmax) = (min.x - shift, max.x - shift);

    if xmax <= half {
        smallvec![Rect::new(
            coord! { x: xmin, y: min.y },
            coord! { x: xmax, y: max.y },
        )]
    } else {
        smallvec![
            Rect::new(coord! { x: xmin, y: min.y }, coord! { x: half, y: max.y }),
            Rect::new(
                coord! { x: -half, y: min.y },
                coord! { x: xmax - world, y: max.y },
            ),
        ]
    }
}

/// The multi-ring polygon a clustering pass tests feature locations against.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentArea {
    rects: NormalizedExtents,
    polygon: MultiPolygon,
}

impl ExtentArea {
    pub fn new(extent: &Rect, spatial_reference: SpatialReference) -> Self {
        let rects = normalize_extent(extent, spatial_reference);
        let polygon = MultiPolygon::new(rects.iter().map(|r| r.to_polygon()).collect());
        Self { rects, polygon }
    }

    /// Whether `point` lies inside or on the boundary of the area.
    pub fn contains_point(&self, point: &Point) -> bool {
        self.polygon.intersects(point)
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn polygon(&self) -> &MultiPolygon {
        &self.polygon
    }
}

/// Running union of every extent that has already triggered a full fetch.
///
/// Only grows until [`VisitedExtent::reset`] is called by a full reinit.
#[derive(Debug, Clone, Default)]
pub struct VisitedExtent {
    area: Option<MultiPolygon>,
}

impl VisitedExtent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_none()
    }

    /// Whether every normalized part of `area` is already covered.
    pub fn contains(&self, area: &ExtentArea) -> bool {
        let Some(visited) = &self.area else {
            return false;
        };
        area.rects()
            .iter()
            .all(|rect| visited.relate(&rect.to_polygon()).is_contains())
    }

    /// Extend the union by `area`.
    pub fn extend(&mut self, area: &ExtentArea) {
        let incoming = area.polygon().clone();
        self.area = Some(match self.area.take() {
            Some(visited) => visited.union(&incoming),
            None => incoming,
        });
    }

    pub fn reset(&mut self) {
        self.area = None;
    }

    pub fn polygon(&self) -> Option<&MultiPolygon> {
        self.area.as_ref()
    }
}
