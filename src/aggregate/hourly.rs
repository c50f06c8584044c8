use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::Document;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::debug;

use super::utility::{mean, round2};
use super::{AggregateRow, HOUR_BUCKET_FORMAT};
use crate::record::{DateRange, HUMIDITY, TEMPERATURE, numeric, updated_at};
use crate::store::RecordSource;

/// Formats `ts` as the wall-clock hour it falls in within `tz`.
pub fn hour_bucket<Tz>(ts: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    ts.with_timezone(tz).format(HOUR_BUCKET_FORMAT).to_string()
}

/// Groups the in-range records by local hour and averages each group.
///
/// Records without a readable `updatedAt` are skipped, and so are
/// non-numeric readings within a group. Rows come back sorted by bucket.
pub fn hourly_rows<Tz>(records: &[Document], range: &DateRange, tz: &Tz) -> Vec<AggregateRow>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    // BTreeMap keeps the fixed-width keys in chronological order.
    let mut groups: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();

    for record in records {
        let Some(ts) = updated_at(record) else {
            continue;
        };
        if !range.contains(&ts) {
            continue;
        }

        let (temperatures, humidities) = groups.entry(hour_bucket(&ts, tz)).or_default();
        if let Some(t) = numeric(record, TEMPERATURE) {
            temperatures.push(round2(t));
        }
        if let Some(h) = numeric(record, HUMIDITY) {
            humidities.push(round2(h));
        }
    }

    groups
        .into_iter()
        .map(|(bucket, (temperatures, humidities))| AggregateRow {
            bucket,
            avg_temperature: mean(&temperatures),
            avg_humidity: mean(&humidities),
        })
        .collect()
}

/// Fetches the day's records from `source` and aggregates them locally.
#[tracing::instrument(skip(source, tz), fields(start = %range.start(), end = %range.end()))]
pub async fn from_source<S, Tz>(source: &S, range: &DateRange, tz: &Tz) -> Result<Vec<AggregateRow>>
where
    S: RecordSource + ?Sized,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let records = source.find_in_range(range).await?;
    let rows = hourly_rows(&records, range, tz);
    debug!(records = records.len(), rows = rows.len(), "Aggregated in-process");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::to_bson_datetime;
    use chrono::FixedOffset;
    use chrono_tz::America::Chicago;
    use mongodb::bson::doc;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn reading(ts: &str, temperature: f64, humidity: f64) -> Document {
        doc! {
            "updatedAt": to_bson_datetime(&utc(ts)),
            "temperature": temperature,
            "humidity": humidity,
        }
    }

    fn whole_day() -> DateRange {
        DateRange::new(utc("2020-05-01T00:00:00Z"), utc("2020-05-02T00:00:00Z")).unwrap()
    }

    #[test]
    fn test_bucket_follows_local_hour_not_utc_hour() {
        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            hour_bucket(&utc("2020-05-01T05:59:00Z"), &minus_five),
            "2020-05-01 00:00:00"
        );
        assert_eq!(
            hour_bucket(&utc("2020-05-01T06:01:00Z"), &minus_five),
            "2020-05-01 01:00:00"
        );
    }

    #[test]
    fn test_same_local_hour_from_different_offsets_groups_together() {
        let records = vec![
            reading("2020-05-01T06:10:00Z", 70.0, 40.0),
            doc! {
                "updatedAt": "2020-05-01T01:50:00-05:00",
                "temperature": 72.0,
                "humidity": 42.0,
            },
        ];
        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        let rows = hourly_rows(&records, &whole_day(), &minus_five);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket, "2020-05-01 01:00:00");
        assert_eq!(rows[0].avg_temperature, 71.0);
    }

    #[test]
    fn test_values_are_rounded_before_averaging() {
        let records = vec![
            reading("2020-05-01T12:00:00Z", 10.004, 50.0),
            reading("2020-05-01T12:30:00Z", 10.006, 50.0),
        ];
        let rows = hourly_rows(&records, &whole_day(), &Chicago);
        assert_eq!(rows.len(), 1);
        // (10.00 + 10.01) / 2, not round2((10.004 + 10.006) / 2) = 10.01
        assert!((rows[0].avg_temperature - 10.005).abs() < 1e-9);
    }

    #[test]
    fn test_rows_sorted_for_any_input_order() {
        let mut records = vec![
            reading("2020-05-01T20:00:00Z", 1.0, 1.0),
            reading("2020-05-01T08:00:00Z", 2.0, 2.0),
            reading("2020-05-01T15:00:00Z", 3.0, 3.0),
            reading("2020-05-01T08:30:00Z", 4.0, 4.0),
        ];
        let expected: Vec<String> = hourly_rows(&records, &whole_day(), &Chicago)
            .into_iter()
            .map(|r| r.bucket)
            .collect();
        assert_eq!(
            expected,
            vec!["2020-05-01 03:00:00", "2020-05-01 10:00:00", "2020-05-01 15:00:00"]
        );

        records.reverse();
        let reversed: Vec<String> = hourly_rows(&records, &whole_day(), &Chicago)
            .into_iter()
            .map(|r| r.bucket)
            .collect();
        assert_eq!(reversed, expected);
        assert!(reversed.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_out_of_range_and_undated_records_are_ignored() {
        let records = vec![
            reading("2020-05-02T00:00:00Z", 99.0, 99.0),
            doc! { "temperature": 99.0, "humidity": 99.0 },
            reading("2020-05-01T00:00:00Z", 60.0, 30.0),
        ];
        let rows = hourly_rows(&records, &whole_day(), &Chicago);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket, "2020-04-30 19:00:00");
        assert_eq!(rows[0].avg_temperature, 60.0);
        assert_eq!(rows[0].avg_humidity, 30.0);
    }

    #[test]
    fn test_missing_readings_do_not_count_toward_mean() {
        let records = vec![
            reading("2020-05-01T12:00:00Z", 70.0, 40.0),
            doc! { "updatedAt": to_bson_datetime(&utc("2020-05-01T12:10:00Z")), "temperature": 72.0 },
        ];
        let rows = hourly_rows(&records, &whole_day(), &Chicago);
        assert_eq!(rows[0].avg_temperature, 71.0);
        assert_eq!(rows[0].avg_humidity, 40.0);
    }

    #[test]
    fn test_empty_input_yields_no_rows() {
        assert!(hourly_rows(&[], &whole_day(), &Chicago).is_empty());
    }
}
