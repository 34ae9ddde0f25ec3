use crate::config::AppConfig;
use crate::error::LayerName;
use crate::loader;
use crate::registry::Registry;
use crate::schema;
use crate::session::{Session, Snapshot};
use crate::view::{self, Filter};
use anyhow::Result;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct AppState {
    pub session: Mutex<Session>,
    pub config: AppConfig,
}

impl AppState {
    /// Persists the flat session snapshot after a mutating interaction.
    /// Best-effort: a failed write is logged and the session keeps going.
    fn persist(&self, session: &Session) {
        let snapshot = Snapshot::capture(session);
        if let Err(e) = snapshot.save_to_file(&self.config.session.snapshot_path) {
            warn!(error = %e, "failed to persist session snapshot");
        }
    }
}

pub async fn start_server(config: AppConfig, session: Session) -> Result<()> {
    let port = config.server.port;
    let static_dir = config.server.static_dir.clone();
    let state = Arc::new(AppState {
        session: Mutex::new(session),
        config,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting dashboard server on http://{}", addr);

    let app = Router::new()
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/points/:name/counts", post(set_counts_handler))
        .route("/api/points/manual", post(manual_points_handler))
        .route("/api/points/column-mapping", post(set_pe_mapping_handler))
        .route("/api/filter", post(set_filter_handler))
        .route(
            "/api/municipalities/name-column",
            post(set_name_column_handler),
        )
        .route("/api/selection", post(set_selection_handler))
        .route("/api/branding", post(set_branding_handler))
        .route("/api/reload", post(reload_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The full composed dashboard payload for one pipeline pass. When the
/// registry is empty the data sections are absent and `setup_required` tells
/// the front-end to show the setup-guidance message instead.
#[derive(Serialize)]
struct DashboardResponse {
    branding: crate::session::Branding,
    setup_required: bool,
    filter: String,
    filter_options: Vec<String>,
    rows: Vec<RowPayload>,
    total_observed: u64,
    total_expected: u64,
    aggregate_pct: f64,
    chart: Option<view::ChartSeries>,
    detail: Option<view::Selection>,
    map: MapPayload,
    columns: ColumnsPayload,
    warnings: Vec<view::ViewWarning>,
    notices: Vec<String>,
}

/// Column choices the front-end offers in its mapping selects, plus the
/// currently active picks.
#[derive(Serialize)]
struct ColumnsPayload {
    meeting_point: Vec<String>,
    meeting_point_mapping: Option<schema::ColumnMapping>,
    municipality: Vec<String>,
    municipality_name_column: Option<String>,
}

#[derive(Serialize)]
struct RowPayload {
    #[serde(flatten)]
    row: view::ComposedRow,
    marker: view::MarkerStyle,
}

#[derive(Serialize)]
struct MapPayload {
    framing: view::MapFraming,
    has_zas: bool,
    has_municipalities: bool,
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Json<DashboardResponse> {
    let session = state.session.lock().expect("session lock poisoned");
    let composed = session.compose_view();
    let detail = view::select_detail(&composed, session.selected_point.as_deref());
    let chart = if composed.rows.is_empty() {
        None
    } else {
        Some(view::chart_series(&composed))
    };
    let framing = view::map_framing(session.zas.as_ref(), &composed.rows);
    let rows = composed
        .rows
        .into_iter()
        .map(|row| RowPayload {
            marker: view::marker_style(row.tier),
            row,
        })
        .collect();

    Json(DashboardResponse {
        branding: session.branding.clone(),
        setup_required: session.registry.is_empty(),
        filter: session.filter.as_value().to_string(),
        filter_options: session.municipality_options(),
        rows,
        total_observed: composed.total_observed,
        total_expected: composed.total_expected,
        aggregate_pct: composed.aggregate_pct,
        chart,
        detail,
        map: MapPayload {
            framing,
            has_zas: session.zas.is_some(),
            has_municipalities: session.municipalities.is_some(),
        },
        columns: ColumnsPayload {
            meeting_point: session.pe_columns(),
            meeting_point_mapping: session.pe_mapping.clone(),
            municipality: session
                .municipalities
                .as_ref()
                .map(|layer| layer.string_columns())
                .unwrap_or_default(),
            municipality_name_column: session.municipality_name_column.clone(),
        },
        warnings: composed.warnings,
        notices: session.notices.clone(),
    })
}

#[derive(Deserialize)]
struct CountsRequest {
    observed: Option<i64>,
    expected: Option<i64>,
}

#[derive(Serialize)]
struct CountsResponse {
    name: String,
    observed: u32,
    expected: u32,
    effectiveness_pct: f64,
}

/// Counter updates reject out-of-range values instead of clamping them; the
/// front-end is expected to constrain its inputs.
async fn set_counts_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(body): Json<CountsRequest>,
) -> Result<Json<CountsResponse>, (StatusCode, String)> {
    let mut session = state.session.lock().expect("session lock poisoned");

    let observed = body
        .observed
        .map(validate_count)
        .transpose()?;
    let expected = body
        .expected
        .map(validate_count)
        .transpose()?;

    if let Some(value) = observed {
        session
            .registry
            .set_observed(&name, value)
            .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    }
    if let Some(value) = expected {
        session
            .registry
            .set_expected(&name, value)
            .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    }

    let (_, counters) = session
        .registry
        .get(&name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown meeting point '{name}'")))?;
    let response = CountsResponse {
        name: name.clone(),
        observed: counters.observed,
        expected: counters.expected,
        effectiveness_pct: session
            .registry
            .effectiveness(&name)
            .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?,
    };
    state.persist(&session);
    Ok(Json(response))
}

fn validate_count(value: i64) -> Result<u32, (StatusCode, String)> {
    u32::try_from(value).map_err(|_| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("count must be a non-negative integer, got {value}"),
        )
    })
}

#[derive(Deserialize)]
struct ManualPointsRequest {
    text: String,
}

#[derive(Serialize)]
struct ManualPointsResponse {
    loaded: usize,
    warnings: Vec<String>,
}

async fn manual_points_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ManualPointsRequest>,
) -> Json<ManualPointsResponse> {
    let mut session = state.session.lock().expect("session lock poisoned");
    let warnings = session.load_manual_points(&body.text);
    let response = ManualPointsResponse {
        loaded: session.registry.len(),
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
    };
    state.persist(&session);
    Json(response)
}

/// Applies an operator-chosen column mapping to the retained tabular rows
/// and re-processes them, the other explicit re-process trigger.
async fn set_pe_mapping_handler(
    State(state): State<Arc<AppState>>,
    Json(mapping): Json<schema::ColumnMapping>,
) -> Result<Json<ManualPointsResponse>, (StatusCode, String)> {
    let mut session = state.session.lock().expect("session lock poisoned");
    if session.pe_rows.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "no tabular meeting-point source loaded".to_string(),
        ));
    }
    let columns = session.pe_columns();
    for column in [&mapping.name, &mapping.latitude, &mapping.longitude] {
        if !columns.contains(column) {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("column '{column}' not present in the meeting-point source"),
            ));
        }
    }
    let notices_before = session.notices.len();
    session.set_pe_mapping(mapping);
    let warnings = session.notices[notices_before..].to_vec();
    let response = ManualPointsResponse {
        loaded: session.registry.len(),
        warnings,
    };
    state.persist(&session);
    Ok(Json(response))
}

#[derive(Deserialize)]
struct FilterRequest {
    municipality: String,
}

async fn set_filter_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FilterRequest>,
) -> Json<serde_json::Value> {
    let mut session = state.session.lock().expect("session lock poisoned");
    session.filter = Filter::from_value(&body.municipality);
    state.persist(&session);
    Json(serde_json::json!({ "filter": session.filter.as_value() }))
}

#[derive(Deserialize)]
struct NameColumnRequest {
    column: String,
}

async fn set_name_column_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NameColumnRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut session = state.session.lock().expect("session lock poisoned");
    let known = session
        .municipalities
        .as_ref()
        .map(|layer| layer.columns().contains(&body.column))
        .unwrap_or(false);
    if !known {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("column '{}' not present in the municipality layer", body.column),
        ));
    }
    session.municipality_name_column = Some(body.column);
    state.persist(&session);
    Ok(Json(
        serde_json::json!({ "column": session.municipality_name_column }),
    ))
}

#[derive(Deserialize)]
struct SelectionRequest {
    name: Option<String>,
}

async fn set_selection_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectionRequest>,
) -> Json<serde_json::Value> {
    let mut session = state.session.lock().expect("session lock poisoned");
    session.selected_point = body.name;
    state.persist(&session);
    Json(serde_json::json!({ "selected": session.selected_point }))
}

#[derive(Deserialize)]
struct BrandingRequest {
    app_title: Option<String>,
    organizer_name: Option<String>,
    organizer_logo_url: Option<String>,
    client_name: Option<String>,
    client_logo_url: Option<String>,
}

async fn set_branding_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BrandingRequest>,
) -> Json<crate::session::Branding> {
    let mut session = state.session.lock().expect("session lock poisoned");
    let branding = &mut session.branding;
    if let Some(v) = body.app_title {
        branding.app_title = v;
    }
    if let Some(v) = body.organizer_name {
        branding.organizer_name = v;
    }
    if let Some(v) = body.organizer_logo_url {
        branding.organizer_logo_url = v;
    }
    if let Some(v) = body.client_name {
        branding.client_name = v;
    }
    if let Some(v) = body.client_logo_url {
        branding.client_logo_url = v;
    }
    let current = session.branding.clone();
    state.persist(&session);
    Json(current)
}

#[derive(Serialize)]
struct ReloadResponse {
    points: usize,
    has_zas: bool,
    has_municipalities: bool,
    notices: Vec<String>,
}

/// Re-runs the auto-load of the configured layer archives, the explicit
/// re-process trigger. The reconciler inside decides whether counters
/// survive.
async fn reload_handler(State(state): State<Arc<AppState>>) -> Json<ReloadResponse> {
    let mut session = state.session.lock().expect("session lock poisoned");
    session.load_configured_layers(&state.config);
    let response = ReloadResponse {
        points: session.registry.len(),
        has_zas: session.zas.is_some(),
        has_municipalities: session.municipalities.is_some(),
        notices: session.notices.clone(),
    };
    state.persist(&session);
    Json(response)
}

/// Batch summary of the configured inputs, for the `inspect` subcommand.
pub fn inspect(config: &AppConfig) -> Result<()> {
    let inputs = [
        (LayerName::SelfRescueZone, &config.input.zas_archive),
        (LayerName::Municipalities, &config.input.municipalities_archive),
        (LayerName::MeetingPoints, &config.input.meeting_points_archive),
    ];
    for (name, path) in inputs {
        let Some(path) = path else {
            println!("{name}: not configured");
            continue;
        };
        match loader::load_layer(path, name) {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    println!("{name}: warning: {warning}");
                }
                match outcome.layer {
                    Some(layer) => {
                        println!("{name}: {} features", layer.features.len());
                        if let Some(bounds) = layer.bounds() {
                            println!(
                                "{name}: bounds ({:.4}, {:.4}) .. ({:.4}, {:.4})",
                                bounds.min().x,
                                bounds.min().y,
                                bounds.max().x,
                                bounds.max().y
                            );
                        }
                        if name == LayerName::Municipalities {
                            if let Some(col) = schema::guess_municipality_column(&layer) {
                                println!("{name}: guessed name column '{col}'");
                            }
                        }
                        if name == LayerName::MeetingPoints {
                            let rows = loader::meeting_point_rows(&layer);
                            let columns: Vec<String> = rows
                                .first()
                                .map(|r| r.keys().cloned().collect())
                                .unwrap_or_default();
                            if let Some(mapping) = schema::guess_mapping(&columns) {
                                println!(
                                    "{name}: guessed columns name='{}' lat='{}' lon='{}'",
                                    mapping.name, mapping.latitude, mapping.longitude
                                );
                                let (records, warnings) = schema::map_rows(&rows, &mapping);
                                let registry = Registry::load(records);
                                println!("{name}: {} valid meeting points", registry.len());
                                for warning in warnings {
                                    println!("{name}: warning: {warning}");
                                }
                            }
                        }
                    }
                    None => println!("{name}: empty layer"),
                }
            }
            Err(e) => println!("{name}: error: {e}"),
        }
    }
    Ok(())
}
