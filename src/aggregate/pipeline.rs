//! Server-side hourly aggregation.

use anyhow::{Context, Result};
use mongodb::Collection;
use mongodb::bson::{self, Document, doc};
use serde::Deserialize;
use tracing::debug;

use super::{AggregateRow, HOUR_BUCKET_FORMAT};
use crate::record::DateRange;

/// One `$group` output document.
#[derive(Debug, Deserialize)]
struct HourlyDoc {
    #[serde(rename = "_id")]
    bucket: String,
    // `$avg` yields null when a group has no numeric values.
    #[serde(rename = "avgTemperature", default)]
    avg_temperature: Option<f64>,
    #[serde(rename = "avgHumidity", default)]
    avg_humidity: Option<f64>,
}

impl From<HourlyDoc> for AggregateRow {
    fn from(doc: HourlyDoc) -> Self {
        AggregateRow {
            bucket: doc.bucket,
            avg_temperature: doc.avg_temperature.unwrap_or(0.0),
            avg_humidity: doc.avg_humidity.unwrap_or(0.0),
        }
    }
}

/// Builds the match → local hour → group → sort pipeline.
pub fn hourly_pipeline(range: &DateRange, timezone: &str) -> Vec<Document> {
    vec![
        doc! { "$match": range.to_filter() },
        doc! {
            "$addFields": {
                "localHour": {
                    "$dateToString": {
                        "format": HOUR_BUCKET_FORMAT,
                        "date": { "$toDate": "$updatedAt" },
                        "timezone": timezone,
                    }
                }
            }
        },
        doc! {
            "$group": {
                "_id": "$localHour",
                "avgHumidity": { "$avg": { "$round": ["$humidity", 2] } },
                "avgTemperature": { "$avg": { "$round": ["$temperature", 2] } },
            }
        },
        doc! { "$sort": { "_id": 1 } },
    ]
}

/// Decodes `$group` output documents into rows, keeping their order.
pub fn rows_from_documents(docs: Vec<Document>) -> Result<Vec<AggregateRow>> {
    docs.into_iter()
        .map(|doc| {
            bson::from_document::<HourlyDoc>(doc)
                .map(AggregateRow::from)
                .context("Failed to decode aggregation result")
        })
        .collect()
}

/// Runs [`hourly_pipeline`] on the server and collects the rows.
#[tracing::instrument(skip(collection), fields(start = %range.start(), end = %range.end()))]
pub async fn run(
    collection: &Collection<Document>,
    range: &DateRange,
    timezone: &str,
) -> Result<Vec<AggregateRow>> {
    let mut cursor = collection
        .aggregate(hourly_pipeline(range, timezone))
        .await
        .context("Failed to run aggregation")?;

    let mut docs = Vec::new();
    while cursor.advance().await.context("Failed to read aggregation cursor")? {
        docs.push(
            cursor
                .deserialize_current()
                .context("Failed to decode aggregation result")?,
        );
    }
    debug!(rows = docs.len(), "Aggregation returned");
    rows_from_documents(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::TIMEZONE;
    use chrono::{DateTime, Utc};
    use mongodb::bson::Bson;

    fn day() -> DateRange {
        let start = DateTime::parse_from_rfc3339("2023-01-01T06:00:00Z").unwrap();
        let end = DateTime::parse_from_rfc3339("2023-01-02T06:00:00Z").unwrap();
        DateRange::new(start.with_timezone(&Utc), end.with_timezone(&Utc)).unwrap()
    }

    #[test]
    fn test_pipeline_stage_order() {
        let pipeline = hourly_pipeline(&day(), TIMEZONE.name());
        let stages: Vec<&str> = pipeline
            .iter()
            .map(|stage| stage.keys().next().unwrap().as_str())
            .collect();
        assert_eq!(stages, vec!["$match", "$addFields", "$group", "$sort"]);
    }

    #[test]
    fn test_pipeline_buckets_in_named_timezone() {
        let pipeline = hourly_pipeline(&day(), TIMEZONE.name());
        let date_to_string = pipeline[1]
            .get_document("$addFields")
            .and_then(|d| d.get_document("localHour"))
            .and_then(|d| d.get_document("$dateToString"))
            .unwrap();
        assert_eq!(date_to_string.get_str("timezone").unwrap(), "America/Chicago");
        assert_eq!(date_to_string.get_str("format").unwrap(), "%Y-%m-%d %H:00:00");
    }

    #[test]
    fn test_pipeline_rounds_inside_average() {
        let pipeline = hourly_pipeline(&day(), TIMEZONE.name());
        let group = pipeline[2].get_document("$group").unwrap();
        let avg = group
            .get_document("avgTemperature")
            .and_then(|d| d.get_document("$avg"))
            .unwrap();
        let round = avg.get_array("$round").unwrap();
        assert_eq!(round[0], Bson::String("$temperature".into()));
        assert_eq!(round[1], Bson::Int32(2));
    }

    #[test]
    fn test_rows_from_documents() {
        let docs = vec![
            doc! { "_id": "2023-01-01 00:00:00", "avgHumidity": 40.333, "avgTemperature": 70.125 },
            doc! { "_id": "2023-01-01 01:00:00", "avgHumidity": Bson::Null, "avgTemperature": 71.0 },
        ];
        let rows = rows_from_documents(docs).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, "2023-01-01 00:00:00");
        assert_eq!(rows[0].avg_temperature, 70.125);
        assert_eq!(rows[0].avg_humidity, 40.333);
        assert_eq!(rows[1].avg_humidity, 0.0);
    }

    #[test]
    fn test_rows_from_documents_rejects_missing_bucket() {
        let docs = vec![doc! { "avgHumidity": 1.0, "avgTemperature": 1.0 }];
        assert!(rows_from_documents(docs).is_err());
    }
}
