use crate::effectiveness::{self, SeverityTier};
use crate::registry::Registry;
use crate::types::VectorLayer;
use serde::Serialize;
use std::collections::BTreeMap;

pub const COLOR_PRIMARY: &str = "#135D79";
pub const COLOR_SECONDARY: &str = "#169674";

/// The active municipality filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    Municipality(String),
}

impl Filter {
    pub fn from_value(value: &str) -> Filter {
        if value.is_empty() || value == "all" || value == "Todos os Municípios" {
            Filter::All
        } else {
            Filter::Municipality(value.to_string())
        }
    }

    pub fn as_value(&self) -> &str {
        match self {
            Filter::All => "Todos os Municípios",
            Filter::Municipality(name) => name,
        }
    }
}

/// Conditions the presentation layer must surface; the composer itself never
/// fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewWarning {
    /// A specific municipality was requested but no classification ever ran
    /// (no layer or no name column). The result is empty by design.
    FilterWithoutClassification,
    /// The filter matched no meeting point.
    EmptyAfterFilter { municipality: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedRow {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed: u32,
    pub expected: u32,
    pub effectiveness_pct: f64,
    pub municipality: Option<String>,
    pub tier: SeverityTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedView {
    pub rows: Vec<ComposedRow>,
    pub total_observed: u64,
    pub total_expected: u64,
    pub aggregate_pct: f64,
    pub warnings: Vec<ViewWarning>,
}

/// Applies the municipality filter to the registry plus classification
/// output. Pure and idempotent: same inputs, same output, no mutation.
pub fn compose(
    registry: &Registry,
    classifications: &BTreeMap<String, String>,
    classification_ran: bool,
    filter: &Filter,
) -> ComposedView {
    let mut warnings = Vec::new();

    if matches!(filter, Filter::Municipality(_)) && !classification_ran {
        return ComposedView {
            rows: Vec::new(),
            total_observed: 0,
            total_expected: 0,
            aggregate_pct: 0.0,
            warnings: vec![ViewWarning::FilterWithoutClassification],
        };
    }

    let mut rows = Vec::new();
    for (point, counters) in registry.iter() {
        let municipality = classifications.get(&point.name).cloned();
        if let Filter::Municipality(wanted) = filter {
            if municipality.as_deref() != Some(wanted.as_str()) {
                continue;
            }
        }
        let pct = effectiveness::percentage(counters.observed, counters.expected);
        rows.push(ComposedRow {
            name: point.name.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
            observed: counters.observed,
            expected: counters.expected,
            effectiveness_pct: pct,
            municipality,
            tier: effectiveness::severity_tier(pct, counters.has_any_data()),
        });
    }

    if rows.is_empty() && !registry.is_empty() {
        if let Filter::Municipality(name) = filter {
            warnings.push(ViewWarning::EmptyAfterFilter {
                municipality: name.clone(),
            });
        }
    }

    let total_observed: u64 = rows.iter().map(|r| r.observed as u64).sum();
    let total_expected: u64 = rows.iter().map(|r| r.expected as u64).sum();
    let aggregate_pct = effectiveness::aggregate(rows.iter().map(|r| (r.observed, r.expected)));

    ComposedView {
        rows,
        total_observed,
        total_expected,
        aggregate_pct,
        warnings,
    }
}

/// Map-marker style, keyed solely by severity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerStyle {
    pub color: &'static str,
    pub icon: &'static str,
}

pub fn marker_style(tier: SeverityTier) -> MarkerStyle {
    match tier {
        SeverityTier::High => MarkerStyle { color: "blue", icon: "ok-sign" },
        SeverityTier::Medium => MarkerStyle { color: "green", icon: "info-sign" },
        SeverityTier::Low => MarkerStyle { color: "orange", icon: "remove-sign" },
        SeverityTier::Critical => MarkerStyle { color: "red", icon: "exclamation-sign" },
        SeverityTier::Unknown => MarkerStyle { color: "gray", icon: "minus-sign" },
    }
}

/// Grouped-bar series of observed vs expected per filtered point, with the
/// fixed two-color mapping the chart contract requires.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub observed: Vec<u32>,
    pub expected: Vec<u32>,
    pub observed_color: &'static str,
    pub expected_color: &'static str,
}

pub fn chart_series(view: &ComposedView) -> ChartSeries {
    ChartSeries {
        labels: view.rows.iter().map(|r| r.name.clone()).collect(),
        observed: view.rows.iter().map(|r| r.observed).collect(),
        expected: view.rows.iter().map(|r| r.expected).collect(),
        observed_color: COLOR_SECONDARY,
        expected_color: COLOR_PRIMARY,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapFraming {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

/// Default map framing: the ZAS extent first, the meeting-point centroid
/// next, a fixed fallback position last. The zoom formula is empirical and
/// clamped to the slippy-map levels that read well on a wall display.
pub fn map_framing(zas: Option<&VectorLayer>, rows: &[ComposedRow]) -> MapFraming {
    if let Some(bounds) = zas.and_then(|layer| layer.bounds()) {
        let center_lon = (bounds.min().x + bounds.max().x) / 2.0;
        let center_lat = (bounds.min().y + bounds.max().y) / 2.0;
        let max_diff = (bounds.max().x - bounds.min().x)
            .abs()
            .max((bounds.max().y - bounds.min().y).abs());
        let zoom = if max_diff > 0.0 {
            (11.0 - max_diff.log2()).floor().clamp(5.0, 16.0) as u8
        } else {
            13
        };
        return MapFraming {
            center_lat,
            center_lon,
            zoom,
        };
    }
    if !rows.is_empty() {
        let n = rows.len() as f64;
        return MapFraming {
            center_lat: rows.iter().map(|r| r.latitude).sum::<f64>() / n,
            center_lon: rows.iter().map(|r| r.longitude).sum::<f64>() / n,
            zoom: 11,
        };
    }
    MapFraming {
        center_lat: -18.45,
        center_lon: -48.00,
        zoom: 10,
    }
}

/// Data for the single-point detail card. The remembered selection falls
/// back to the first filtered row when it no longer exists.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub name: String,
    pub observed: u32,
    pub expected: u32,
    pub effectiveness_pct: f64,
    /// Progress-bar value, clamped to 100.
    pub progress: u8,
}

pub fn select_detail(view: &ComposedView, remembered: Option<&str>) -> Option<Selection> {
    let row = remembered
        .and_then(|name| view.rows.iter().find(|r| r.name == name))
        .or_else(|| view.rows.first())?;
    Some(Selection {
        name: row.name.clone(),
        observed: row.observed,
        expected: row.expected,
        effectiveness_pct: row.effectiveness_pct,
        progress: row.effectiveness_pct.clamp(0.0, 100.0) as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointRecord;

    fn registry(points: &[(&str, f64, f64)]) -> Registry {
        Registry::load(points.iter().map(|(name, lat, lon)| PointRecord {
            name: name.to_string(),
            latitude: *lat,
            longitude: *lon,
        }))
    }

    fn classified(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn all_filter_passes_everything_through() {
        let reg = registry(&[("A", 1.0, 1.0), ("B", 2.0, 2.0)]);
        let class = classified(&[("A", "Itira")]);
        let view = compose(&reg, &class, true, &Filter::All);
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.rows[0].municipality.as_deref(), Some("Itira"));
        assert_eq!(view.rows[1].municipality, None);
        assert!(view.warnings.is_empty());
    }

    #[test]
    fn municipality_filter_keeps_matching_rows_only() {
        let reg = registry(&[("A", 1.0, 1.0), ("B", 2.0, 2.0)]);
        let class = classified(&[("A", "Itira"), ("B", "Berilo")]);
        let view = compose(&reg, &class, true, &Filter::Municipality("Itira".into()));
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].name, "A");
    }

    #[test]
    fn filter_without_classification_is_empty_with_warning() {
        let reg = registry(&[("A", 1.0, 1.0)]);
        let view = compose(
            &reg,
            &BTreeMap::new(),
            false,
            &Filter::Municipality("Itira".into()),
        );
        assert!(view.rows.is_empty());
        assert_eq!(view.warnings, vec![ViewWarning::FilterWithoutClassification]);

        // "All municipalities" with no classification still shows everything.
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        assert_eq!(view.rows.len(), 1);
        assert!(view.warnings.is_empty());
    }

    #[test]
    fn unmatched_filter_signals_empty_after_filter() {
        let reg = registry(&[("A", 1.0, 1.0)]);
        let class = classified(&[("A", "Itira")]);
        let view = compose(&reg, &class, true, &Filter::Municipality("Berilo".into()));
        assert!(view.rows.is_empty());
        assert_eq!(
            view.warnings,
            vec![ViewWarning::EmptyAfterFilter {
                municipality: "Berilo".into()
            }]
        );
    }

    #[test]
    fn aggregate_uses_sum_then_divide() {
        let mut reg = registry(&[("A", 1.0, 1.0), ("B", 2.0, 2.0)]);
        reg.set_observed("A", 10).unwrap();
        reg.set_expected("A", 10).unwrap();
        reg.set_observed("B", 0).unwrap();
        reg.set_expected("B", 1000).unwrap();
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        assert_eq!(view.total_observed, 10);
        assert_eq!(view.total_expected, 1010);
        assert!((view.aggregate_pct - 10.0 / 1010.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn compose_is_idempotent() {
        let reg = registry(&[("A", 1.0, 1.0)]);
        let class = classified(&[("A", "Itira")]);
        let first = compose(&reg, &class, true, &Filter::All);
        let second = compose(&reg, &class, true, &Filter::All);
        assert_eq!(first.rows.len(), second.rows.len());
        assert_eq!(first.aggregate_pct, second.aggregate_pct);
        assert_eq!(first.warnings, second.warnings);
    }

    #[test]
    fn marker_styles_distinguish_unknown_from_critical() {
        assert_eq!(marker_style(SeverityTier::Critical).color, "red");
        assert_eq!(marker_style(SeverityTier::Unknown).color, "gray");
        assert_ne!(
            marker_style(SeverityTier::Unknown),
            marker_style(SeverityTier::Critical)
        );
        assert_eq!(marker_style(SeverityTier::High).icon, "ok-sign");
    }

    #[test]
    fn chart_series_carries_the_fixed_colors() {
        let mut reg = registry(&[("A", 1.0, 1.0)]);
        reg.set_observed("A", 3).unwrap();
        reg.set_expected("A", 4).unwrap();
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        let chart = chart_series(&view);
        assert_eq!(chart.labels, vec!["A"]);
        assert_eq!(chart.observed, vec![3]);
        assert_eq!(chart.expected, vec![4]);
        assert_eq!(chart.observed_color, COLOR_SECONDARY);
        assert_eq!(chart.expected_color, COLOR_PRIMARY);
    }

    #[test]
    fn framing_prefers_zas_then_points_then_default() {
        use crate::types::{Feature, VectorLayer};
        use geo::{polygon, Geometry};

        let zas = VectorLayer {
            features: vec![Feature {
                geometry: Geometry::Polygon(polygon![
                    (x: -43.0, y: -17.0),
                    (x: -42.0, y: -17.0),
                    (x: -42.0, y: -16.0),
                    (x: -43.0, y: -16.0),
                    (x: -43.0, y: -17.0),
                ]),
                attributes: Default::default(),
            }],
        };
        let framed = map_framing(Some(&zas), &[]);
        assert_eq!(framed.center_lon, -42.5);
        assert_eq!(framed.center_lat, -16.5);
        // max extent 1 degree: zoom = 11 - log2(1) = 11.
        assert_eq!(framed.zoom, 11);

        let reg = registry(&[("A", -18.0, -48.0), ("B", -19.0, -49.0)]);
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        let framed = map_framing(None, &view.rows);
        assert_eq!(framed.center_lat, -18.5);
        assert_eq!(framed.center_lon, -48.5);
        assert_eq!(framed.zoom, 11);

        let framed = map_framing(None, &[]);
        assert_eq!((framed.center_lat, framed.center_lon), (-18.45, -48.0));
        assert_eq!(framed.zoom, 10);
    }

    #[test]
    fn detail_selection_falls_back_to_first_row() {
        let reg = registry(&[("A", 1.0, 1.0), ("B", 2.0, 2.0)]);
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        assert_eq!(select_detail(&view, Some("B")).unwrap().name, "B");
        assert_eq!(select_detail(&view, Some("gone")).unwrap().name, "A");
        assert_eq!(select_detail(&view, None).unwrap().name, "A");
        let empty = compose(&Registry::default(), &BTreeMap::new(), false, &Filter::All);
        assert!(select_detail(&empty, None).is_none());
    }

    #[test]
    fn progress_clamps_above_100_percent() {
        let mut reg = registry(&[("A", 1.0, 1.0)]);
        reg.set_observed("A", 30).unwrap();
        reg.set_expected("A", 10).unwrap();
        let view = compose(&reg, &BTreeMap::new(), false, &Filter::All);
        let detail = select_detail(&view, None).unwrap();
        assert_eq!(detail.effectiveness_pct, 300.0);
        assert_eq!(detail.progress, 100);
    }
}
