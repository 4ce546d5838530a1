//! Export of observations (CSV) and fit results (JSON).
//!
//! The CSV layout is the one `ingest` reads, so simulated months can be fed
//! straight back into the estimators.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::domain::MonthlyObservation;
use crate::error::AppError;

/// Write months as per-sample CSV rows.
pub fn write_months_csv(path: &Path, months: &[MonthlyObservation]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display())))?;
    write_months(BufWriter::new(file), months)
}

pub fn write_months<W: Write>(mut out: W, months: &[MonthlyObservation]) -> Result<(), AppError> {
    let with_bg = months.iter().any(|m| m.background().is_some());
    let header = if with_bg {
        "month,ws,c,d,b,f,omega_bg"
    } else {
        "month,ws,c,d,b,f"
    };
    writeln!(out, "{header}").map_err(|e| AppError::new(2, format!("Failed to write CSV header: {e}")))?;

    for m in months {
        let month = m.month().format("%Y-%m");
        for i in 0..m.len() {
            // `{}` on f64 prints the shortest representation that reads back exactly.
            write!(
                out,
                "{month},{},{},{},{},{}",
                m.ws()[i],
                m.c()[i],
                m.d()[i],
                m.b()[i],
                m.shape_factor()[i]
            )
            .and_then(|()| match (with_bg, m.background()) {
                (true, Some(bg)) => writeln!(out, ",{}", bg[i]),
                (true, None) => writeln!(out, ","),
                (false, _) => writeln!(out),
            })
            .map_err(|e| AppError::new(2, format!("Failed to write CSV row: {e}")))?;
        }
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush CSV: {e}")))
}

/// Pretty-printed JSON export of any result record.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create JSON '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value)
        .map_err(|e| AppError::new(2, format!("Failed to write JSON: {e}")))?;
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ingest::read_months;
    use chrono::NaiveDate;

    #[test]
    fn csv_reads_back_through_ingest() {
        let month = MonthlyObservation::new(
            NaiveDate::from_ymd_opt(2018, 11, 1).unwrap(),
            vec![2.5, 3.25, f64::NAN],
            vec![1.234_567_890_123e-3, 9.87e-4, 1e-3],
            vec![12.0, 3.0, 0.0],
            vec![12.0, 3.0, 0.0],
            4.2e4,
        )
        .unwrap()
        .with_background(vec![1e-5, 2e-5, 0.0])
        .unwrap();

        let mut buf = Vec::new();
        write_months(&mut buf, std::slice::from_ref(&month)).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("month,ws,c,d,b,f,omega_bg\n2018-11,2.5,"));

        let back = read_months(buf.as_slice(), 4.2e4).unwrap();
        let got = &back.months[0];
        assert_eq!(got.c()[..2], month.c()[..2]);
        assert!(got.ws()[2].is_nan());
        assert_eq!(got.background(), month.background());
        assert_eq!(got.shape_factor(), month.shape_factor());
    }
}
