//! Record storage seams.
//!
//! [`RecordSource`] selects records by date range and [`RecordSink`] writes
//! them. [`MongoStore`] implements both against a MongoDB deployment;
//! [`MemoryCollection`] is an in-process stand-in with the same write
//! semantics.

pub mod memory;
pub mod mongo;

pub use memory::MemoryCollection;
pub use mongo::MongoStore;

use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::Document;

use crate::record::DateRange;

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns every record whose `updatedAt` lies in `range`.
    async fn find_in_range(&self, range: &DateRange) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Inserts all records as new documents and returns how many were written.
    async fn insert_many(&self, records: Vec<Document>) -> Result<usize>;

    /// Inserts the record, or sets its fields on the existing document with
    /// the same `_id`.
    async fn upsert_by_id(&self, record: Document) -> Result<()>;
}
