use geo::algorithm::bounding_rect::BoundingRect;
use geo::{Geometry, Rect};
use std::collections::BTreeMap;

/// One attribute value read from a dbase record or GeoJSON property.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Null,
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view, tolerating numbers stored as text.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => s.trim().replace(',', ".").parse().ok(),
            AttrValue::Null => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// A vector layer normalized to WGS84 degrees.
#[derive(Debug, Clone, Default)]
pub struct VectorLayer {
    pub features: Vec<Feature>,
}

impl VectorLayer {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Union of the feature bounding boxes, None for an empty layer.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let mut merged: Option<Rect<f64>> = None;
        for feature in &self.features {
            let Some(rect) = feature.geometry.bounding_rect() else {
                continue;
            };
            merged = Some(match merged {
                None => rect,
                Some(acc) => Rect::new(
                    geo::Coord {
                        x: acc.min().x.min(rect.min().x),
                        y: acc.min().y.min(rect.min().y),
                    },
                    geo::Coord {
                        x: acc.max().x.max(rect.max().x),
                        y: acc.max().y.max(rect.max().y),
                    },
                ),
            });
        }
        merged
    }

    /// Attribute columns in first-seen order across features.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = Vec::new();
        for feature in &self.features {
            for name in feature.attributes.keys() {
                if !cols.iter().any(|c| c == name) {
                    cols.push(name.clone());
                }
            }
        }
        cols
    }

    /// Columns that hold text in at least one feature. Used to offer
    /// candidate municipality-name columns.
    pub fn string_columns(&self) -> Vec<String> {
        self.columns()
            .into_iter()
            .filter(|col| {
                self.features
                    .iter()
                    .any(|f| matches!(f.attributes.get(col), Some(AttrValue::Text(_))))
            })
            .collect()
    }
}

/// A raw meeting-point row before registry dedup, as produced by the
/// schema-mapping step or the manual-entry parser.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}
