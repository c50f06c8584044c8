//! Copying a date range of records between collections.

use anyhow::{Result, bail};
use clap::ValueEnum;
use tracing::{info, warn};

use crate::record::{DateRange, ID};
use crate::store::{RecordSink, RecordSource};

/// How matched records are written to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransferMode {
    /// One bulk insert; fails on records already present.
    Insert,
    /// Upsert each record by its own `_id`; safe to re-run.
    Upsert,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub matched: usize,
    pub written: usize,
    pub failed: usize,
}

/// Copies every record of `source` whose `updatedAt` lies in `range` to `dest`.
///
/// Nothing is written when no record matches. In [`TransferMode::Upsert`]
/// a failing record does not stop the others; failures are logged, and once
/// every record has been attempted the transfer returns an error naming how
/// many failed.
#[tracing::instrument(
    skip(source, dest),
    fields(start = %range.start(), end = %range.end())
)]
pub async fn transfer<S, D>(
    source: &S,
    dest: &D,
    range: &DateRange,
    mode: TransferMode,
) -> Result<TransferReport>
where
    S: RecordSource + ?Sized,
    D: RecordSink + ?Sized,
{
    let records = source.find_in_range(range).await?;
    let mut report = TransferReport {
        matched: records.len(),
        ..TransferReport::default()
    };

    if records.is_empty() {
        info!("No records found in range");
        return Ok(report);
    }

    match mode {
        TransferMode::Insert => {
            report.written = dest.insert_many(records).await?;
        }
        TransferMode::Upsert => {
            // One round trip per record. The driver's only bulk API,
            // `Client::bulk_write`, needs MongoDB 8.0 or newer.
            for record in records {
                let id = record.get(ID).cloned();
                match dest.upsert_by_id(record).await {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        warn!(id = ?id, error = %e, "Record upsert failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    info!(
        matched = report.matched,
        written = report.written,
        failed = report.failed,
        "Transfer finished"
    );

    if report.failed > 0 {
        bail!(
            "{} of {} records failed to upsert",
            report.failed,
            report.matched
        );
    }
    Ok(report)
}
