use crate::error::{LayerError, LayerName, LayerWarning};
use crate::types::{AttrValue, Feature, VectorLayer};
use geo::algorithm::map_coords::MapCoords;
use geo::{Coord, Geometry, MultiPolygon, Point};
use proj4rs::Proj;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

/// Result of loading one layer. `layer: None` means the layer is absent for
/// the rest of the pipeline (empty source, for instance); hard failures are
/// the `LayerError` path instead.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub layer: Option<VectorLayer>,
    pub warnings: Vec<LayerWarning>,
}

/// Loads a vector layer from disk and normalizes it to WGS84 degrees.
/// Accepts a `.zip` archive containing a shapefile (searched recursively),
/// a bare `.shp`, or a GeoJSON file.
pub fn load_layer(path: &Path, layer: LayerName) -> Result<LoadOutcome, LayerError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let outcome = match extension.as_str() {
        "zip" => load_archive(path, layer)?,
        "shp" => load_shapefile(path, layer)?,
        "json" | "geojson" => load_geojson(path, layer)?,
        _ => {
            return Err(LayerError::UnsupportedFormat {
                layer,
                extension,
            })
        }
    };

    if let Some(ref l) = outcome.layer {
        info!(layer = %layer, features = l.features.len(), "layer loaded");
    }
    Ok(outcome)
}

fn load_archive(path: &Path, layer: LayerName) -> Result<LoadOutcome, LayerError> {
    let file = File::open(path).map_err(|source| LayerError::Io {
        layer,
        path: path.display().to_string(),
        source,
    })?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|source| LayerError::Archive { layer, source })?;

    let tmpdir = tempfile::tempdir().map_err(|source| LayerError::Io {
        layer,
        path: path.display().to_string(),
        source,
    })?;
    archive
        .extract(tmpdir.path())
        .map_err(|source| LayerError::Archive { layer, source })?;

    let shp_path =
        find_shp_recursive(tmpdir.path()).ok_or(LayerError::MissingShapefile { layer })?;
    load_shapefile(&shp_path, layer)
}

/// First `.shp` found, searching nested directories. Archives produced by
/// GIS exports often wrap the shapefile in a subdirectory.
fn find_shp_recursive(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
        {
            return Some(path);
        }
    }
    subdirs.into_iter().find_map(|d| find_shp_recursive(&d))
}

fn load_shapefile(shp_path: &Path, layer: LayerName) -> Result<LoadOutcome, LayerError> {
    let mut warnings = Vec::new();

    let crs = match read_prj(shp_path) {
        Some(wkt) => detect_crs(&wkt, layer)?,
        None => {
            warnings.push(LayerWarning::AssumedWgs84 { layer });
            DetectedCrs::Wgs84
        }
    };

    let mut reader =
        shapefile::Reader::from_path(shp_path).map_err(|source| LayerError::Shapefile {
            layer,
            source,
        })?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|source| LayerError::Shapefile { layer, source })?;
        let Some(geometry) = shape_to_geometry(shape) else {
            continue;
        };
        let attributes = record
            .into_iter()
            .map(|(name, value)| (name, field_to_attr(value)))
            .collect();
        features.push(Feature {
            geometry,
            attributes,
        });
    }

    let mut result = VectorLayer { features };
    if let DetectedCrs::Utm { zone, south } = crs {
        result = reproject_utm(result, zone, south, layer)?;
    }

    if result.is_empty() {
        warnings.push(LayerWarning::EmptyLayer { layer });
        return Ok(LoadOutcome {
            layer: None,
            warnings,
        });
    }
    Ok(LoadOutcome {
        layer: Some(result),
        warnings,
    })
}

fn shape_to_geometry(shape: shapefile::Shape) -> Option<Geometry<f64>> {
    match shape {
        shapefile::Shape::Point(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        shapefile::Shape::PointM(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        shapefile::Shape::PointZ(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        shapefile::Shape::Polygon(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().ok()?;
            Some(Geometry::MultiPolygon(mp))
        }
        shapefile::Shape::PolygonM(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().ok()?;
            Some(Geometry::MultiPolygon(mp))
        }
        shapefile::Shape::PolygonZ(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().ok()?;
            Some(Geometry::MultiPolygon(mp))
        }
        _ => None,
    }
}

fn field_to_attr(value: shapefile::dbase::FieldValue) -> AttrValue {
    use shapefile::dbase::FieldValue;
    match value {
        FieldValue::Character(Some(s)) => AttrValue::Text(s.trim().to_string()),
        FieldValue::Character(None) => AttrValue::Null,
        FieldValue::Numeric(Some(n)) => AttrValue::Number(n),
        FieldValue::Numeric(None) => AttrValue::Null,
        FieldValue::Float(Some(f)) => AttrValue::Number(f as f64),
        FieldValue::Float(None) => AttrValue::Null,
        FieldValue::Integer(i) => AttrValue::Number(i as f64),
        FieldValue::Double(d) => AttrValue::Number(d),
        FieldValue::Logical(Some(b)) => AttrValue::Text(b.to_string()),
        _ => AttrValue::Null,
    }
}

fn read_prj(shp_path: &Path) -> Option<String> {
    let prj_path = shp_path.with_extension("prj");
    let mut content = String::new();
    File::open(prj_path)
        .ok()?
        .read_to_string(&mut content)
        .ok()?;
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectedCrs {
    Wgs84,
    Utm { zone: u8, south: bool },
}

/// CRS detection from `.prj` WKT. Geographic WGS84/SIRGAS (degrees on
/// GRS80/WGS84, indistinguishable at drill scale) passes through; projected
/// UTM is reprojected; anything else makes the layer unavailable.
fn detect_crs(wkt: &str, layer: LayerName) -> Result<DetectedCrs, LayerError> {
    let lower = wkt.to_lowercase();
    let projected = lower.contains("projcs");
    if projected {
        if let Some((zone, south)) = parse_utm_zone(&lower) {
            return Ok(DetectedCrs::Utm { zone, south });
        }
        return Err(LayerError::UnsupportedCrs {
            layer,
            detail: summarize_wkt(wkt),
        });
    }
    if lower.contains("wgs") && lower.contains("84")
        || lower.contains("4326")
        || lower.contains("sirgas")
    {
        return Ok(DetectedCrs::Wgs84);
    }
    Err(LayerError::UnsupportedCrs {
        layer,
        detail: summarize_wkt(wkt),
    })
}

/// Pulls `zone 23S` / `UTM_Zone_23S` style declarations out of lowercased
/// WKT text.
fn parse_utm_zone(lower: &str) -> Option<(u8, bool)> {
    if !lower.contains("utm") {
        return None;
    }
    let idx = lower.find("zone")?;
    let rest = &lower[idx + 4..];
    let rest = rest.trim_start_matches(|c: char| c == '_' || c == ' ' || c == '-');
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let zone: u8 = digits.parse().ok()?;
    if !(1..=60).contains(&zone) {
        return None;
    }
    let after = &rest[digits.len()..];
    let south = match after.trim_start().chars().next() {
        Some('s') => true,
        Some('n') => false,
        // Hemisphere letter missing from the zone token; fall back to the
        // rest of the WKT (southern UTM zones carry a 10,000km false northing).
        _ => lower.contains("south") || lower.contains("10000000"),
    };
    Some((zone, south))
}

fn summarize_wkt(wkt: &str) -> String {
    let trimmed = wkt.trim();
    if trimmed.chars().count() > 80 {
        let head: String = trimmed.chars().take(80).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

/// Reprojects a UTM layer to WGS84 degrees. Failure is reported once for
/// the whole layer; no partial result is returned.
fn reproject_utm(
    layer_data: VectorLayer,
    zone: u8,
    south: bool,
    layer: LayerName,
) -> Result<VectorLayer, LayerError> {
    let src_def = format!(
        "+proj=utm +zone={}{} +ellps=GRS80 +units=m +no_defs",
        zone,
        if south { " +south" } else { "" }
    );
    let src = Proj::from_proj_string(&src_def).map_err(|e| LayerError::Reprojection {
        layer,
        detail: e.to_string(),
    })?;
    let dst = Proj::from_proj_string("+proj=longlat +datum=WGS84 +no_defs").map_err(|e| {
        LayerError::Reprojection {
            layer,
            detail: e.to_string(),
        }
    })?;

    let mut features = Vec::with_capacity(layer_data.features.len());
    for feature in layer_data.features {
        let geometry = feature
            .geometry
            .try_map_coords(|coord| {
                let mut pt = (coord.x, coord.y, 0.0);
                proj4rs::transform::transform(&src, &dst, &mut pt)?;
                Ok::<_, proj4rs::errors::Error>(Coord {
                    x: pt.0.to_degrees(),
                    y: pt.1.to_degrees(),
                })
            })
            .map_err(|e| LayerError::Reprojection {
                layer,
                detail: e.to_string(),
            })?;
        features.push(Feature {
            geometry,
            attributes: feature.attributes,
        });
    }
    Ok(VectorLayer { features })
}

fn load_geojson(path: &Path, layer: LayerName) -> Result<LoadOutcome, LayerError> {
    let file = File::open(path).map_err(|source| LayerError::Io {
        layer,
        path: path.display().to_string(),
        source,
    })?;
    let reader = std::io::BufReader::new(file);
    let geojson = geojson::GeoJson::from_reader(reader).map_err(|e| LayerError::GeoJson {
        layer,
        detail: e.to_string(),
    })?;
    parse_geojson(geojson, layer)
}

/// GeoJSON is WGS84 by specification; no reprojection step.
fn parse_geojson(geojson: geojson::GeoJson, layer: LayerName) -> Result<LoadOutcome, LayerError> {
    let collection = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(LayerError::GeoJson {
                layer,
                detail: "expected a FeatureCollection".to_string(),
            })
        }
    };

    let mut features = Vec::new();
    for feature in collection.features {
        let Some(geom) = feature.geometry else {
            continue;
        };
        let geometry: Geometry<f64> = match geom.value.try_into() {
            Ok(g) => g,
            Err(_) => continue,
        };
        let mut attributes = BTreeMap::new();
        if let Some(props) = feature.properties {
            for (key, value) in props {
                attributes.insert(key, json_to_attr(value));
            }
        }
        features.push(Feature {
            geometry,
            attributes,
        });
    }

    if features.is_empty() {
        return Ok(LoadOutcome {
            layer: None,
            warnings: vec![LayerWarning::EmptyLayer { layer }],
        });
    }
    Ok(LoadOutcome {
        layer: Some(VectorLayer { features }),
        warnings: Vec::new(),
    })
}

fn json_to_attr(value: serde_json::Value) -> AttrValue {
    match value {
        serde_json::Value::String(s) => AttrValue::Text(s),
        serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number).unwrap_or(AttrValue::Null),
        _ => AttrValue::Null,
    }
}

/// Flattens point features into attribute rows for the column-mapping step,
/// injecting `Latitude`/`Longitude` from the geometry. Geometry-derived
/// coordinates win over same-named attribute columns. Non-point features
/// are skipped.
pub fn meeting_point_rows(layer_data: &VectorLayer) -> Vec<BTreeMap<String, AttrValue>> {
    let mut rows = Vec::new();
    for feature in &layer_data.features {
        let Geometry::Point(point) = &feature.geometry else {
            continue;
        };
        let mut row = feature.attributes.clone();
        row.insert("Latitude".to_string(), AttrValue::Number(point.y()));
        row.insert("Longitude".to_string(), AttrValue::Number(point.x()));
        rows.push(row);
    }
    rows
}
