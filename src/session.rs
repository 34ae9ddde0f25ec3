use crate::classify::{self, Classifier};
use crate::config::{AppConfig, BrandingConfig};
use crate::error::{LayerError, LayerName, LayerWarning, RowWarning};
use crate::loader::{self, LoadOutcome};
use crate::registry::Registry;
use crate::schema::{self, ColumnMapping};
use crate::types::{AttrValue, PointRecord, VectorLayer};
use crate::view::{self, ComposedView, Filter};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Branding {
    pub app_title: String,
    pub organizer_name: String,
    pub organizer_logo_url: String,
    pub client_name: String,
    pub client_logo_url: String,
}

impl From<&BrandingConfig> for Branding {
    fn from(config: &BrandingConfig) -> Self {
        Branding {
            app_title: config.app_title.clone(),
            organizer_name: config.organizer_name.clone(),
            organizer_logo_url: config.organizer_logo_url.clone(),
            client_name: config.client_name.clone(),
            client_logo_url: config.client_logo_url.clone(),
        }
    }
}

/// The single evolving dashboard session. Every interaction mutates this
/// through one of the explicit operations below; each pipeline pass reads a
/// consistent snapshot of it.
#[derive(Debug, Default)]
pub struct Session {
    pub branding: Branding,
    pub registry: Registry,
    pub zas: Option<VectorLayer>,
    pub municipalities: Option<VectorLayer>,
    pub municipality_name_column: Option<String>,
    pub filter: Filter,
    pub selected_point: Option<String>,
    /// Identity-set baseline from the previous load, for the reconciler.
    pub previous_identity: BTreeSet<String>,
    /// Raw attribute rows of the last meeting-point source, kept so the
    /// operator can re-map columns without re-uploading. Not persisted.
    pub pe_rows: Vec<BTreeMap<String, AttrValue>>,
    /// Operator-chosen column mapping; when unset the alias guess applies.
    pub pe_mapping: Option<ColumnMapping>,
    /// Counters restored from a snapshot before any registry exists. They
    /// bind on the next load if the identity set matches the persisted one.
    pub pending_counters: BTreeMap<String, (u32, u32)>,
    /// Layer-level notices accumulated by the latest load, shown once.
    pub notices: Vec<String>,
}

/// Outcome of the identity-set comparison that wraps every registry load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Identity set unchanged; counters carried over untouched.
    Unchanged,
    /// Identity set differs; every counter and the point selection were
    /// reset. A single rename wipes everything, by design.
    Reset,
}

/// Pure comparison step of the reconciler.
pub fn identity_changed(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> bool {
    previous != current
}

impl Session {
    pub fn new(config: &AppConfig) -> Session {
        Session {
            branding: Branding::from(&config.branding),
            ..Session::default()
        }
    }

    /// Installs a freshly loaded registry, reconciling counters against the
    /// previous identity set: an unchanged set keeps the operator's entries,
    /// any difference resets all counters and the detail selection.
    pub fn apply_registry(&mut self, mut new_registry: Registry) -> Reconciliation {
        let new_identity = new_registry.identity_set();
        let outcome = if identity_changed(&self.previous_identity, &new_identity) {
            self.selected_point = None;
            Reconciliation::Reset
        } else {
            new_registry.adopt_counters(&self.registry);
            if !self.pending_counters.is_empty() {
                new_registry.restore_counters(&self.pending_counters);
            }
            Reconciliation::Unchanged
        };
        // Restored counters bind at most once; a reset discards them as
        // stale along with everything else.
        self.pending_counters.clear();
        self.previous_identity = new_identity;
        self.registry = new_registry;
        outcome
    }

    /// Replaces the registry from manual-entry text. Per-line problems are
    /// returned for display; the batch itself never fails.
    pub fn load_manual_points(&mut self, text: &str) -> Vec<RowWarning> {
        let (records, warnings) = schema::parse_manual(text);
        self.apply_registry(Registry::load(records));
        warnings
    }

    /// Replaces the registry from already-mapped rows (archive or table
    /// source after the column-mapping step).
    pub fn load_points(&mut self, records: Vec<PointRecord>) -> Reconciliation {
        self.apply_registry(Registry::load(records))
    }

    /// Loads the layers configured for auto-load. Layer failures degrade to
    /// absent layers and a notice; they never abort the session.
    pub fn load_configured_layers(&mut self, config: &AppConfig) {
        self.notices.clear();

        if let Some(path) = &config.input.zas_archive {
            self.zas = self.take_layer(loader::load_layer(path, LayerName::SelfRescueZone));
        }
        if let Some(path) = &config.input.municipalities_archive {
            self.municipalities =
                self.take_layer(loader::load_layer(path, LayerName::Municipalities));
            if let Some(layer) = &self.municipalities {
                if self.municipality_name_column.is_none() {
                    self.municipality_name_column = schema::guess_municipality_column(layer);
                }
            }
        }

        let rows = if let Some(path) = &config.input.meeting_points_archive {
            self.take_layer(loader::load_layer(path, LayerName::MeetingPoints))
                .map(|layer| loader::meeting_point_rows(&layer))
        } else if let Some(path) = &config.input.meeting_points_table {
            match schema::load_table(path) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    warn!(error = %e, "meeting-point table failed to load");
                    self.notices.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        if let Some(rows) = rows {
            self.pe_rows = rows;
            self.reprocess_points();
        }
    }

    /// Column names available in the retained meeting-point rows.
    pub fn pe_columns(&self) -> Vec<String> {
        self.pe_rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Maps the retained raw rows with the active column mapping (the
    /// operator's choice, or the alias guess) and installs the result.
    pub fn reprocess_points(&mut self) -> Reconciliation {
        let mapping = self
            .pe_mapping
            .clone()
            .or_else(|| schema::guess_mapping(&self.pe_columns()));
        let records = match mapping {
            Some(mapping) => {
                let (records, warnings) = schema::map_rows(&self.pe_rows, &mapping);
                self.push_row_warnings(&warnings);
                records
            }
            None => Vec::new(),
        };
        let loaded = records.len();
        let outcome = self.load_points(records);
        info!(points = loaded, ?outcome, "meeting points processed");
        outcome
    }

    /// Stores an operator-chosen column mapping and re-processes the
    /// retained rows with it.
    pub fn set_pe_mapping(&mut self, mapping: ColumnMapping) -> Reconciliation {
        self.pe_mapping = Some(mapping);
        self.reprocess_points()
    }

    fn take_layer(&mut self, result: Result<LoadOutcome, LayerError>) -> Option<VectorLayer> {
        match result {
            Ok(LoadOutcome { layer, warnings }) => {
                for warning in warnings {
                    self.push_layer_warning(&warning);
                }
                layer
            }
            Err(e) => {
                warn!(error = %e, layer = %e.layer(), "layer unavailable");
                self.notices.push(e.to_string());
                None
            }
        }
    }

    fn push_layer_warning(&mut self, warning: &LayerWarning) {
        warn!("{warning}");
        self.notices.push(warning.to_string());
    }

    fn push_row_warnings(&mut self, warnings: &[RowWarning]) {
        for warning in warnings {
            warn!("{warning}");
            self.notices.push(warning.to_string());
        }
    }

    /// Whether a spatial classification can run in this pass.
    pub fn classification_available(&self) -> bool {
        self.municipalities.is_some() && self.municipality_name_column.is_some()
    }

    /// Runs one full pipeline pass: classify against the current registry
    /// snapshot, then compose the filtered view. Classifier and registry
    /// always come from the same pass, never a stale mix.
    pub fn compose_view(&self) -> ComposedView {
        let classifier = Classifier::build(
            self.municipalities.as_ref(),
            self.municipality_name_column.as_deref(),
        );
        let classifications = classifier
            .as_ref()
            .map(|c| classify::classify(&self.registry, c))
            .unwrap_or_default();
        view::compose(
            &self.registry,
            &classifications,
            classifier.is_some(),
            &self.filter,
        )
    }

    /// Filter options offered to the operator: the "all" sentinel plus the
    /// sorted municipality names from the loaded layer.
    pub fn municipality_options(&self) -> Vec<String> {
        let mut options = vec![Filter::All.as_value().to_string()];
        if let Some(classifier) = Classifier::build(
            self.municipalities.as_ref(),
            self.municipality_name_column.as_deref(),
        ) {
            options.extend(classifier.municipality_names());
        }
        options
    }
}

/// Flat key/value snapshot persisted after each pass. Geometry layers and
/// derived tables are deliberately excluded; they reload from source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Snapshot {
    pub app_title: String,
    pub organizer_name: String,
    pub organizer_logo_url: String,
    pub client_name: String,
    pub client_logo_url: String,
    pub selected_municipality_filter: String,
    pub municipality_name_column: Option<String>,
    pub pe_name_column: Option<String>,
    pub pe_latitude_column: Option<String>,
    pub pe_longitude_column: Option<String>,
    pub selected_point: Option<String>,
    pub previous_identity: Vec<String>,
    pub counters: BTreeMap<String, (u32, u32)>,
}

impl Snapshot {
    pub fn capture(session: &Session) -> Snapshot {
        Snapshot {
            app_title: session.branding.app_title.clone(),
            organizer_name: session.branding.organizer_name.clone(),
            organizer_logo_url: session.branding.organizer_logo_url.clone(),
            client_name: session.branding.client_name.clone(),
            client_logo_url: session.branding.client_logo_url.clone(),
            selected_municipality_filter: session.filter.as_value().to_string(),
            municipality_name_column: session.municipality_name_column.clone(),
            pe_name_column: session.pe_mapping.as_ref().map(|m| m.name.clone()),
            pe_latitude_column: session.pe_mapping.as_ref().map(|m| m.latitude.clone()),
            pe_longitude_column: session.pe_mapping.as_ref().map(|m| m.longitude.clone()),
            selected_point: session.selected_point.clone(),
            previous_identity: session.previous_identity.iter().cloned().collect(),
            counters: session.registry.counters_snapshot(),
        }
    }

    /// Applies a restored snapshot onto a fresh session. Counters only bind
    /// to names the current registry knows; everything else is dropped, the
    /// same way a stale browser state would be.
    pub fn restore(self, session: &mut Session) {
        session.branding = Branding {
            app_title: self.app_title,
            organizer_name: self.organizer_name,
            organizer_logo_url: self.organizer_logo_url,
            client_name: self.client_name,
            client_logo_url: self.client_logo_url,
        };
        session.filter = Filter::from_value(&self.selected_municipality_filter);
        if self.municipality_name_column.is_some() {
            session.municipality_name_column = self.municipality_name_column;
        }
        if let (Some(name), Some(latitude), Some(longitude)) = (
            self.pe_name_column,
            self.pe_latitude_column,
            self.pe_longitude_column,
        ) {
            session.pe_mapping = Some(ColumnMapping {
                name,
                latitude,
                longitude,
            });
        }
        session.selected_point = self.selected_point;
        session.previous_identity = self.previous_identity.into_iter().collect();
        if session.registry.is_empty() {
            // Restored before any load; counters bind when the identity
            // set of the next load matches the persisted one.
            session.pending_counters = self.counters;
        } else {
            session.registry.restore_counters(&self.counters);
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write session snapshot: {:?}", path))
    }

    pub fn load_from_file(path: &Path) -> Result<Snapshot> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session snapshot: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse session snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointRecord;

    fn records(names: &[&str]) -> Vec<PointRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| PointRecord {
                name: name.to_string(),
                latitude: i as f64,
                longitude: i as f64,
            })
            .collect()
    }

    #[test]
    fn unchanged_identity_preserves_counters() {
        let mut session = Session::default();
        session.load_points(records(&["A", "B"]));
        session.registry.set_observed("A", 12).unwrap();
        session.registry.set_expected("B", 30).unwrap();

        let outcome = session.load_points(records(&["A", "B"]));
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(session.registry.get("A").unwrap().1.observed, 12);
        assert_eq!(session.registry.get("B").unwrap().1.expected, 30);
    }

    #[test]
    fn any_identity_change_resets_everything() {
        let mut session = Session::default();
        session.load_points(records(&["A", "B"]));
        session.registry.set_observed("A", 12).unwrap();
        session.selected_point = Some("A".to_string());

        let outcome = session.load_points(records(&["A", "C"]));
        assert_eq!(outcome, Reconciliation::Reset);
        // A survived the rename of B to C but its counter is gone too.
        assert_eq!(session.registry.get("A").unwrap().1.observed, 0);
        assert_eq!(session.registry.get("C").unwrap().1.expected, 1);
        assert!(session.selected_point.is_none());
        assert_eq!(
            session.previous_identity,
            ["A", "C"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn first_load_counts_as_a_change() {
        let mut session = Session::default();
        let outcome = session.load_points(records(&["A"]));
        assert_eq!(outcome, Reconciliation::Reset);
    }

    #[test]
    fn reload_order_does_not_matter_for_identity() {
        let mut session = Session::default();
        session.load_points(records(&["A", "B"]));
        session.registry.set_observed("A", 5).unwrap();
        // Same names in a different order is the same identity set.
        let outcome = session.load_points(records(&["B", "A"]));
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(session.registry.get("A").unwrap().1.observed, 5);
    }

    #[test]
    fn manual_load_reports_warnings_and_installs_points() {
        let mut session = Session::default();
        let warnings = session.load_manual_points("PE1 | -18,45 | -48,00\nbadline");
        assert_eq!(warnings.len(), 1);
        assert_eq!(session.registry.len(), 1);
        assert!(session.registry.get("PE1").is_some());
    }

    #[test]
    fn operator_mapping_overrides_the_alias_guess() {
        let mut row = BTreeMap::new();
        row.insert(
            "Ponto de Encontro".to_string(),
            AttrValue::Text("PE1".to_string()),
        );
        row.insert("Y".to_string(), AttrValue::Number(-18.4));
        row.insert("X".to_string(), AttrValue::Number(-48.0));

        let mut session = Session::default();
        session.pe_rows = vec![row];
        session.set_pe_mapping(ColumnMapping {
            name: "Ponto de Encontro".to_string(),
            latitude: "Y".to_string(),
            longitude: "X".to_string(),
        });

        let (point, _) = session.registry.get("PE1").unwrap();
        assert_eq!((point.latitude, point.longitude), (-18.4, -48.0));
    }

    #[test]
    fn restored_counters_bind_on_the_next_matching_load() {
        let mut session = Session::default();
        session.load_points(records(&["A"]));
        session.registry.set_observed("A", 6).unwrap();
        let snapshot = Snapshot::capture(&session);

        // A fresh process restores the snapshot before any layer loads.
        let mut fresh = Session::default();
        snapshot.restore(&mut fresh);
        assert!(fresh.registry.is_empty());

        let outcome = fresh.load_points(records(&["A"]));
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(fresh.registry.get("A").unwrap().1.observed, 6);
        assert!(fresh.pending_counters.is_empty());
    }

    #[test]
    fn restored_counters_discarded_when_identity_differs() {
        let mut session = Session::default();
        session.load_points(records(&["A"]));
        session.registry.set_observed("A", 6).unwrap();
        let snapshot = Snapshot::capture(&session);

        let mut fresh = Session::default();
        snapshot.restore(&mut fresh);
        let outcome = fresh.load_points(records(&["B"]));
        assert_eq!(outcome, Reconciliation::Reset);
        assert_eq!(fresh.registry.get("B").unwrap().1.observed, 0);
        assert!(fresh.pending_counters.is_empty());
    }

    #[test]
    fn full_pass_classifies_and_filters() {
        use crate::types::{AttrValue, Feature};
        use geo::{polygon, Geometry};

        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert("NM_MUN".to_string(), AttrValue::Text("Itira".to_string()));
        let municipality = Feature {
            geometry: Geometry::Polygon(polygon![
                (x: -43.0, y: -17.0),
                (x: -42.0, y: -17.0),
                (x: -42.0, y: -16.0),
                (x: -43.0, y: -16.0),
                (x: -43.0, y: -17.0),
            ]),
            attributes,
        };

        let mut session = Session::default();
        session.municipalities = Some(VectorLayer {
            features: vec![municipality],
        });
        session.municipality_name_column = Some("NM_MUN".to_string());
        session.load_points(vec![
            PointRecord {
                name: "PE1".to_string(),
                latitude: -16.5,
                longitude: -42.5,
            },
            PointRecord {
                name: "PE2".to_string(),
                latitude: -20.0,
                longitude: -50.0,
            },
        ]);
        session.registry.set_observed("PE1", 80).unwrap();
        session.registry.set_expected("PE1", 100).unwrap();

        let view = session.compose_view();
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.rows[0].municipality.as_deref(), Some("Itira"));
        assert_eq!(view.rows[1].municipality, None);

        session.filter = Filter::Municipality("Itira".to_string());
        let view = session.compose_view();
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].name, "PE1");
        assert_eq!(view.aggregate_pct, 80.0);
        assert_eq!(
            session.municipality_options(),
            vec!["Todos os Municípios".to_string(), "Itira".to_string()]
        );
    }

    #[test]
    fn snapshot_round_trip_restores_counters_for_known_names() {
        let mut session = Session::default();
        session.branding.app_title = "Simulado TCS".to_string();
        session.load_points(records(&["A", "B"]));
        session.registry.set_observed("A", 9).unwrap();
        session.filter = Filter::Municipality("Itira".to_string());

        let snapshot = Snapshot::capture(&session);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();

        let mut fresh = Session::default();
        fresh.load_points(records(&["A", "B"]));
        // load_points set a new baseline; restore overwrites it with the
        // persisted one, as a fresh process start would.
        restored.restore(&mut fresh);
        assert_eq!(fresh.branding.app_title, "Simulado TCS");
        assert_eq!(fresh.filter, Filter::Municipality("Itira".to_string()));
        assert_eq!(fresh.registry.get("A").unwrap().1.observed, 9);
    }

    #[test]
    fn snapshot_counters_ignore_vanished_names() {
        let mut session = Session::default();
        session.load_points(records(&["A"]));
        session.registry.set_observed("A", 4).unwrap();
        let snapshot = Snapshot::capture(&session);

        let mut fresh = Session::default();
        fresh.load_points(records(&["B"]));
        snapshot.restore(&mut fresh);
        assert_eq!(fresh.registry.get("B").unwrap().1.observed, 0);
    }

    #[test]
    fn snapshot_excludes_geometry_layers() {
        let session = Session::default();
        let snapshot = Snapshot::capture(&session);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("features"));
        assert!(!json.contains("geometry"));
    }
}
