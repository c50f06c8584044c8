//! Output sinks for hourly aggregates.
//!
//! Supports a human-readable console listing and a dated CSV export.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::aggregate::AggregateRow;
use crate::aggregate::utility::round2;

pub const CSV_HEADER: [&str; 3] = [
    "measurement_date_time",
    "temperature_F",
    "humidity_percent",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    measurement_date_time: &'a str,
    #[serde(rename = "temperature_F")]
    temperature: String,
    humidity_percent: String,
}

fn two_decimals(value: f64) -> String {
    format!("{:.2}", round2(value))
}

/// `measurements_<YYYY-MM-DD>.csv` for the given run date.
pub fn csv_file_name(run_date: NaiveDate) -> String {
    format!("measurements_{}.csv", run_date.format("%Y-%m-%d"))
}

/// Writes one `Hour: ..., Avg Humidity: ..., Avg Temperature: ...` line per row.
pub fn write_console<W: Write>(out: &mut W, rows: &[AggregateRow]) -> Result<()> {
    for row in rows {
        writeln!(
            out,
            "Hour: {}, Avg Humidity: {}, Avg Temperature: {}",
            row.bucket,
            two_decimals(row.avg_humidity),
            two_decimals(row.avg_temperature)
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Writes the fixed header followed by one row per aggregate, temperature first.
pub fn write_csv<W: Write>(out: W, rows: &[AggregateRow]) -> Result<()> {
    // The header is written by hand so an empty result still gets one.
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);

    writer.write_record(CSV_HEADER)?;
    for row in rows {
        writer.serialize(CsvRow {
            measurement_date_time: &row.bucket,
            temperature: two_decimals(row.avg_temperature),
            humidity_percent: two_decimals(row.avg_humidity),
        })?;
    }
    writer.flush()?;

    Ok(())
}

/// Creates (or truncates) the dated CSV in `dir` and writes `rows` to it.
pub fn export_csv(dir: &Path, run_date: NaiveDate, rows: &[AggregateRow]) -> Result<PathBuf> {
    let path = dir.join(csv_file_name(run_date));
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV");

    let file = File::create(&path)
        .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
    write_csv(file, rows)
        .with_context(|| format!("Failed to write CSV file {}", path.display()))?;

    Ok(path)
}
