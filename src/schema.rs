use crate::error::RowWarning;
use crate::types::{AttrValue, PointRecord, VectorLayer};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Fixed alias lists used to pre-select columns when a meeting-point file is
/// loaded. The operator can always override the guess.
const NAME_ALIASES: &[&str] = &["Nome", "nome", "Name", "name", "PE", "PONTO"];
const LAT_ALIASES: &[&str] = &["Latitude", "Lat"];
const LON_ALIASES: &[&str] = &["Longitude", "Lon", "Lng"];

/// Aliases tried for the municipality-name column, case-insensitively on the
/// second pass.
const MUNICIPALITY_ALIASES: &[&str] =
    &["MUNICIPIO", "NOME_MUN", "NM_MUN", "NOMEMUNIC", "NAME", "NOME"];

/// Which source columns hold the meeting-point name and coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: String,
    pub latitude: String,
    pub longitude: String,
}

fn find_alias(columns: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| columns.iter().position(|c| c == alias))
}

/// Best-effort default mapping for a meeting-point attribute table: alias
/// match first, positional fallback (name, lat, lon in order) otherwise.
/// Returns None only for an empty column list.
pub fn guess_mapping(columns: &[String]) -> Option<ColumnMapping> {
    if columns.is_empty() {
        return None;
    }
    let name_idx = find_alias(columns, NAME_ALIASES).unwrap_or(0);
    let lat_idx =
        find_alias(columns, LAT_ALIASES).unwrap_or(if columns.len() > 1 { 1 } else { 0 });
    let lon_idx =
        find_alias(columns, LON_ALIASES).unwrap_or(if columns.len() > 2 { 2 } else { 0 });
    Some(ColumnMapping {
        name: columns[name_idx].clone(),
        latitude: columns[lat_idx].clone(),
        longitude: columns[lon_idx].clone(),
    })
}

/// Default municipality-name column among the string-typed columns: exact
/// alias match first, then case-insensitive, then the first string column.
pub fn guess_municipality_column(layer: &VectorLayer) -> Option<String> {
    let string_cols = layer.string_columns();
    let candidates = if string_cols.is_empty() {
        layer.columns()
    } else {
        string_cols
    };
    for alias in MUNICIPALITY_ALIASES {
        if let Some(col) = candidates.iter().find(|c| c.as_str() == *alias) {
            return Some(col.clone());
        }
        if let Some(col) = candidates
            .iter()
            .find(|c| c.eq_ignore_ascii_case(alias))
        {
            return Some(col.clone());
        }
    }
    candidates.first().cloned()
}

/// Applies a column mapping to attribute rows, producing strongly-typed
/// point records. Rows with missing or non-numeric coordinates are reported
/// and skipped.
pub fn map_rows(
    rows: &[BTreeMap<String, AttrValue>],
    mapping: &ColumnMapping,
) -> (Vec<PointRecord>, Vec<RowWarning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for row in rows {
        let name = match row.get(&mapping.name) {
            Some(AttrValue::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(AttrValue::Number(n)) => n.to_string(),
            _ => {
                warnings.push(RowWarning::UnmappableRow {
                    name: "<sem nome>".to_string(),
                });
                continue;
            }
        };
        let lat = row.get(&mapping.latitude).and_then(AttrValue::as_number);
        let lon = row.get(&mapping.longitude).and_then(AttrValue::as_number);
        match (lat, lon) {
            (Some(latitude), Some(longitude)) => records.push(PointRecord {
                name,
                latitude,
                longitude,
            }),
            _ => warnings.push(RowWarning::UnmappableRow { name }),
        }
    }
    (records, warnings)
}

/// Parses manual meeting-point entry, one point per line in the format
/// `Name | Latitude | Longitude`. Comma decimal separators are tolerated.
/// Malformed lines are reported individually; the batch never aborts.
pub fn parse_manual(text: &str) -> (Vec<PointRecord>, Vec<RowWarning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.contains('|') {
            warnings.push(RowWarning::MissingDelimiter {
                line: trimmed.to_string(),
            });
            continue;
        }
        let parts: Vec<&str> = trimmed.split('|').collect();
        if parts.len() != 3 {
            warnings.push(RowWarning::WrongFieldCount {
                line: trimmed.to_string(),
            });
            continue;
        }
        let name = parts[0].trim().to_string();
        let lat = parts[1].trim().replace(',', ".").parse::<f64>();
        let lon = parts[2].trim().replace(',', ".").parse::<f64>();
        match (lat, lon) {
            (Ok(latitude), Ok(longitude)) => records.push(PointRecord {
                name,
                latitude,
                longitude,
            }),
            _ => warnings.push(RowWarning::InvalidCoordinate {
                line: trimmed.to_string(),
            }),
        }
    }
    (records, warnings)
}

/// Reads a tabular meeting-point source (CSV) into generic attribute rows,
/// ready for the same mapping step the geometry path uses.
pub fn load_table(path: &Path) -> Result<Vec<BTreeMap<String, AttrValue>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open meeting-point table: {:?}", path))?;
    let mut rdr = csv::ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut row = BTreeMap::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").trim();
            if value.is_empty() {
                row.insert(header.to_string(), AttrValue::Null);
            } else {
                row.insert(header.to_string(), AttrValue::Text(value.to_string()));
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
