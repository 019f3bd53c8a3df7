//! Reads the identifier list from a CSV file.
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("input has no columns")]
    NoColumns,
}

/// Deduplicated ids in first-seen order, plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdList {
    pub ids: Vec<i64>,
    pub blank: usize,
    pub invalid: usize,
    pub duplicates: usize,
}

pub fn read_ids(path: &Path, id_column: &str) -> Result<IdList, InputError> {
    let file = File::open(path)?;
    let list = read_ids_from(file, id_column)?;
    info!(
        path = %path.display(),
        ids = list.ids.len(),
        duplicates = list.duplicates,
        blank = list.blank,
        invalid = list.invalid,
        "loaded input ids"
    );
    Ok(list)
}

/// Uses the column named `id_column` (case and surrounding whitespace ignored)
/// or, failing that, the first column.
pub fn read_ids_from<R: Read>(reader: R, id_column: &str) -> Result<IdList, InputError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        return Err(InputError::NoColumns);
    }
    let wanted = id_column.trim().to_lowercase();
    let column = headers
        .iter()
        .position(|h| h.trim().to_lowercase() == wanted)
        .unwrap_or(0);
    debug!(column, header = headers.get(column).unwrap_or_default(), "id column selected");

    let mut list = IdList::default();
    let mut seen = HashSet::new();
    for record in rdr.records() {
        let record = record?;
        let cell = record.get(column).unwrap_or_default();
        if is_null(cell) {
            list.blank += 1;
            continue;
        }
        match parse_id(cell) {
            Some(id) if seen.insert(id) => list.ids.push(id),
            Some(_) => list.duplicates += 1,
            None => {
                if list.invalid == 0 {
                    warn!(value = cell, "skipping non-integer id");
                }
                list.invalid += 1;
            }
        }
    }
    Ok(list)
}

fn is_null(cell: &str) -> bool {
    cell.is_empty()
        || cell.eq_ignore_ascii_case("nan")
        || cell.eq_ignore_ascii_case("null")
        || cell.eq_ignore_ascii_case("none")
}

/// Accepts integral floats such as `123.0`, which spreadsheet exports produce.
fn parse_id(cell: &str) -> Option<i64> {
    if let Ok(id) = cell.parse::<i64>() {
        return Some(id);
    }
    let value: f64 = cell.parse().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Some(value as i64)
    } else {
        None
    }
}
