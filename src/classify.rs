use crate::registry::Registry;
use crate::types::{AttrValue, VectorLayer};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Geometry, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;

/// One municipality polygon prepared for the spatial index. `order` is the
/// feature's position in the source layer and breaks ties deterministically
/// when polygons overlap.
struct IndexedPolygon {
    order: usize,
    name: String,
    geometry: MultiPolygon<f64>,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Point-in-polygon classifier over the municipality layer. Built once per
/// pipeline pass from the layer and the selected name column.
pub struct Classifier {
    tree: RTree<IndexedPolygon>,
}

impl Classifier {
    /// Returns None when the layer or the name column is unavailable, in
    /// which case every point stays unclassified (not an error).
    pub fn build(municipalities: Option<&VectorLayer>, name_column: Option<&str>) -> Option<Classifier> {
        let layer = municipalities?;
        let column = name_column?;

        let mut polygons = Vec::new();
        for (order, feature) in layer.features.iter().enumerate() {
            let geometry = match &feature.geometry {
                Geometry::MultiPolygon(mp) => mp.clone(),
                Geometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
                _ => continue,
            };
            let name = match feature.attributes.get(column) {
                Some(AttrValue::Text(s)) => s.clone(),
                Some(AttrValue::Number(n)) => n.to_string(),
                _ => continue,
            };
            let Some(bbox) = geometry.bounding_rect() else {
                continue;
            };
            polygons.push(IndexedPolygon {
                order,
                name,
                geometry,
                aabb: AABB::from_corners(
                    [bbox.min().x, bbox.min().y],
                    [bbox.max().x, bbox.max().y],
                ),
            });
        }
        Some(Classifier {
            tree: RTree::bulk_load(polygons),
        })
    }

    /// Containing municipality for a single location, or None when the point
    /// lies outside every polygon. `geo::Contains` is boundary-exclusive, so
    /// a point exactly on an edge is unclassified. Among overlapping matches
    /// the polygon earliest in the source layer wins.
    pub fn locate(&self, longitude: f64, latitude: f64) -> Option<&str> {
        let point = Point::new(longitude, latitude);
        let envelope = AABB::from_point([longitude, latitude]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|candidate| candidate.geometry.contains(&point))
            .min_by_key(|candidate| candidate.order)
            .map(|candidate| candidate.name.as_str())
    }

    /// All distinct municipality names present in the index, sorted. Feeds
    /// the filter options offered to the operator.
    pub fn municipality_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tree
            .iter()
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Spatial join of every registry point against the municipality layer.
/// Returns a mapping from point name to municipality name; points outside
/// every polygon are simply absent from the map. Duplicate result rows per
/// point name collapse keep-first, matching the registry's identity rule.
pub fn classify(registry: &Registry, classifier: &Classifier) -> BTreeMap<String, String> {
    let mut assignments = BTreeMap::new();
    for (point, _) in registry.iter() {
        if let Some(name) = classifier.locate(point.longitude, point.latitude) {
            assignments
                .entry(point.name.clone())
                .or_insert_with(|| name.to_string());
        }
    }
    assignments
}
