//! Sensor records and the half-open date ranges used to select them.

use anyhow::{Result, anyhow, ensure};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use mongodb::bson::{self, Bson, Document, doc};

pub const ID: &str = "_id";
pub const UPDATED_AT: &str = "updatedAt";
pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";

/// Reads `updatedAt` from a record.
///
/// Accepts a BSON date, an RFC 3339 string, or epoch milliseconds, which are
/// the encodings `$toDate` understands for this collection.
pub fn updated_at(record: &Document) -> Option<DateTime<Utc>> {
    match record.get(UPDATED_AT)? {
        Bson::DateTime(dt) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
        Bson::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Bson::Int64(ms) => DateTime::from_timestamp_millis(*ms),
        Bson::Int32(ms) => DateTime::from_timestamp_millis(i64::from(*ms)),
        Bson::Double(ms) if ms.is_finite() => DateTime::from_timestamp_millis(*ms as i64),
        _ => None,
    }
}

/// Reads a numeric field as `f64`, ignoring non-numeric values.
pub fn numeric(record: &Document, field: &str) -> Option<f64> {
    match record.get(field)? {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

pub fn to_bson_datetime(dt: &DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(dt.timestamp_millis())
}

/// A `[start, end)` interval over record timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        ensure!(
            start < end,
            "invalid date range: start {start} is not before end {end}"
        );
        Ok(Self { start, end })
    }

    /// The calendar day `day` as observed in `tz`, midnight to midnight.
    ///
    /// Days containing a DST transition are 23 or 25 hours long.
    pub fn local_day<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> Result<Self> {
        let next = day
            .succ_opt()
            .ok_or_else(|| anyhow!("no day follows {day}"))?;
        Self::new(local_midnight(day, tz)?, local_midnight(next, tz)?)
    }

    /// The local day before the one containing `now`.
    pub fn yesterday<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> Result<Self> {
        let today = now.with_timezone(tz).date_naive();
        let yesterday = today
            .pred_opt()
            .ok_or_else(|| anyhow!("no day precedes {today}"))?;
        Self::local_day(yesterday, tz)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start <= *t && *t < self.end
    }

    /// Query filter selecting records whose `updatedAt` falls in the range.
    pub fn to_filter(&self) -> Document {
        doc! {
            "updatedAt": {
                "$gte": to_bson_datetime(&self.start),
                "$lt": to_bson_datetime(&self.end),
            }
        }
    }
}

fn local_midnight<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("midnight of {day} does not exist in the target timezone"))
}

/// Parses a CLI instant: RFC 3339, or a bare `YYYY-MM-DD` taken as UTC midnight.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| format!("'{s}' is neither RFC 3339 nor YYYY-MM-DD"))
}
