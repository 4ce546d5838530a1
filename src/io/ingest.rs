//! CSV ingest of per-sample monthly observations.
//!
//! One row per wind-binned sample. Required columns: `month`, `ws`, `c`.
//! Optional: `d` (pixel count), `b` (weight), `f` (shape factor),
//! `omega_bg` (background). Rows are grouped by month, in calendar order.
//!
//! Empty `ws`/`c` cells are kept as NaN so the estimators' mask drops them;
//! cells that fail to parse make the row an error (reported, then skipped).

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use csv::StringRecord;

use crate::domain::{DEFAULT_SHAPE_FACTOR, MonthlyObservation, ShapeFactor};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub month: Option<String>,
    pub message: String,
}

/// Ingest output: one record per month plus what was skipped.
#[derive(Debug, Clone)]
pub struct IngestedMonths {
    pub months: Vec<MonthlyObservation>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

#[derive(Debug, Default)]
struct MonthRows {
    ws: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
    b: Vec<f64>,
    f: Vec<f64>,
    bg: Vec<f64>,
}

struct Row {
    month: NaiveDate,
    ws: f64,
    c: f64,
    d: f64,
    b: f64,
    f: f64,
    bg: f64,
}

/// Load a monthly CSV; `length_scale` (m) applies to every month.
pub fn load_months(path: &Path, length_scale: f64) -> Result<IngestedMonths, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_months(file, length_scale)
}

pub fn read_months<R: Read>(source: R, length_scale: f64) -> Result<IngestedMonths, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map)?;
    let has_background = header_map.contains_key("omega_bg");

    let mut grouped: BTreeMap<NaiveDate, MonthRows> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_used = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    month: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map) {
            Ok(row) => {
                let g = grouped.entry(row.month).or_default();
                g.ws.push(row.ws);
                g.c.push(row.c);
                g.d.push(row.d);
                g.b.push(row.b);
                g.f.push(row.f);
                g.bg.push(row.bg);
                rows_used += 1;
            }
            Err(message) => row_errors.push(RowError {
                line,
                month: get_optional(&record, &header_map, "month").map(str::to_string),
                message,
            }),
        }
    }

    if rows_used == 0 {
        return Err(AppError::new(3, "No valid rows remain after ingest."));
    }

    let mut months = Vec::with_capacity(grouped.len());
    for (month, rows) in grouped {
        let mut obs = MonthlyObservation::new(month, rows.ws, rows.c, rows.d, rows.b, length_scale)?
            .with_shape_factor(ShapeFactor::PerSample(rows.f))?;
        if has_background {
            obs = obs.with_background(rows.bg)?;
        }
        months.push(obs);
    }

    Ok(IngestedMonths {
        months,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    for name in ["month", "ws", "c"] {
        if !header_map.contains_key(name) {
            return Err(AppError::new(2, format!("Missing required column: `{name}`")));
        }
    }
    Ok(())
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<Row, String> {
    let month = parse_month(get_required(record, header_map, "month")?)?;
    let ws = parse_cell(record, header_map, "ws")?.unwrap_or(f64::NAN);
    let c = parse_cell(record, header_map, "c")?.unwrap_or(f64::NAN);
    let d = parse_cell(record, header_map, "d")?.unwrap_or(0.0);
    let b = match parse_cell(record, header_map, "b")? {
        Some(v) => v,
        None if header_map.contains_key("b") => 0.0,
        None => 1.0,
    };
    let f = parse_cell(record, header_map, "f")?.unwrap_or(DEFAULT_SHAPE_FACTOR);
    if !(f.is_finite() && f > 0.0) {
        return Err(format!("Invalid shape factor `f`: {f}"));
    }
    let bg = parse_cell(record, header_map, "omega_bg")?.unwrap_or(0.0);

    Ok(Row {
        month,
        ws,
        c,
        d,
        b,
        f,
        bg,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    get_optional(record, header_map, name).ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

/// `Ok(None)` for a missing column or an empty cell.
fn parse_cell(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<Option<f64>, String> {
    get_optional(record, header_map, name)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| format!("Invalid number in `{name}`: '{s}'"))
        })
        .transpose()
}

/// Parse a month key; any day of the month maps to the first.
fn parse_month(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
    let parsed = FMTS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        // Plain `YYYY-MM`.
        .or_else(|| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok());
    parsed
        .and_then(|d| d.with_day(1))
        .ok_or_else(|| format!("Invalid month '{s}'. Expected YYYY-MM or YYYY-MM-DD."))
}
