use std::fmt;
use thiserror::Error;

/// Which input layer an error refers to. Display matches the names the
/// operator sees in the layer upload sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerName {
    SelfRescueZone,
    Municipalities,
    MeetingPoints,
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerName::SelfRescueZone => write!(f, "ZAS"),
            LayerName::Municipalities => write!(f, "Municípios"),
            LayerName::MeetingPoints => write!(f, "PEs"),
        }
    }
}

/// Fatal-for-the-layer errors. The layer is treated as absent afterwards;
/// the rest of the dashboard keeps working with whatever is available.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("failed to read {layer} file {path}: {source}")]
    Io {
        layer: LayerName,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open {layer} archive: {source}")]
    Archive {
        layer: LayerName,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("no .shp file found in the {layer} archive")]
    MissingShapefile { layer: LayerName },
    #[error("failed to read {layer} shapefile: {source}")]
    Shapefile {
        layer: LayerName,
        #[source]
        source: shapefile::Error,
    },
    #[error("failed to parse {layer} GeoJSON: {detail}")]
    GeoJson { layer: LayerName, detail: String },
    #[error("unsupported coordinate system for {layer}: {detail}")]
    UnsupportedCrs { layer: LayerName, detail: String },
    #[error("reprojection of {layer} to WGS84 failed: {detail}")]
    Reprojection { layer: LayerName, detail: String },
    #[error("unsupported geometry format '{extension}' for {layer}")]
    UnsupportedFormat { layer: LayerName, extension: String },
}

impl LayerError {
    pub fn layer(&self) -> LayerName {
        match self {
            LayerError::Io { layer, .. }
            | LayerError::Archive { layer, .. }
            | LayerError::MissingShapefile { layer }
            | LayerError::Shapefile { layer, .. }
            | LayerError::GeoJson { layer, .. }
            | LayerError::UnsupportedCrs { layer, .. }
            | LayerError::Reprojection { layer, .. }
            | LayerError::UnsupportedFormat { layer, .. } => *layer,
        }
    }
}

/// Non-fatal, layer-level notices surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerWarning {
    #[error("{layer} has no CRS definition, assuming WGS84 (EPSG:4326)")]
    AssumedWgs84 { layer: LayerName },
    #[error("{layer} produced an empty layer and was ignored")]
    EmptyLayer { layer: LayerName },
}

/// Per-row problems in meeting-point inputs. The offending row is skipped,
/// the rest of the batch still loads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowWarning {
    #[error("line '{line}' does not contain '|' as delimiter")]
    MissingDelimiter { line: String },
    #[error("line '{line}' does not match the expected format (Name | Lat | Lon)")]
    WrongFieldCount { line: String },
    #[error("line '{line}' has a non-numeric coordinate")]
    InvalidCoordinate { line: String },
    #[error("row '{name}' dropped: missing or non-numeric latitude/longitude")]
    UnmappableRow { name: String },
}
