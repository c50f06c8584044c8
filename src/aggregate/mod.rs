//! Hourly aggregation of sensor records.
//!
//! Records from one day are bucketed by wall-clock hour in a fixed timezone,
//! and each bucket reports the mean temperature and humidity. Values are
//! rounded to two decimals before they are averaged. The work runs either
//! on the server as an aggregation [`pipeline`] or in-process via [`hourly`];
//! both produce the same rows.

pub mod hourly;
pub mod pipeline;
pub mod utility;

use chrono_tz::Tz;

/// Timezone whose wall-clock hours define the buckets.
pub const TIMEZONE: Tz = chrono_tz::America::Chicago;

/// Bucket key format, shared by chrono and `$dateToString`.
pub const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%d %H:00:00";

/// Averages for one local hour.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// `YYYY-MM-DD HH:00:00` in [`TIMEZONE`].
    pub bucket: String,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
}
