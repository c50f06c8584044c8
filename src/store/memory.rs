use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::DateTime;
use mongodb::bson::{Bson, Document, oid::ObjectId};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{RecordSink, RecordSource};
use crate::record::{DateRange, ID, UPDATED_AT};

/// An in-process collection with MongoDB's insert and `$set` upsert semantics.
///
/// Range queries match only BSON date values of `updatedAt`, as the server's
/// `$gte`/`$lt` against a date does; string or numeric timestamps never match.
///
/// Inserting a record whose `_id` already exists fails, as with a unique
/// `_id` index. Every call to a [`RecordSink`] method is counted.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    docs: Mutex<Vec<Document>>,
    write_calls: AtomicUsize,
}

impl MemoryCollection {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: Mutex::new(docs),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// A copy of the current contents, in insertion order.
    pub fn snapshot(&self) -> Vec<Document> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Document>> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordSource for MemoryCollection {
    async fn find_in_range(&self, range: &DateRange) -> Result<Vec<Document>> {
        Ok(self
            .lock()
            .iter()
            .filter(|doc| match doc.get(UPDATED_AT) {
                Some(Bson::DateTime(dt)) => DateTime::from_timestamp_millis(dt.timestamp_millis())
                    .is_some_and(|t| range.contains(&t)),
                _ => false,
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordSink for MemoryCollection {
    async fn insert_many(&self, records: Vec<Document>) -> Result<usize> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self.lock();
        let count = records.len();
        for mut record in records {
            if !record.contains_key(ID) {
                record.insert(ID, ObjectId::new());
            }
            if docs.iter().any(|d| d.get(ID) == record.get(ID)) {
                bail!("duplicate key: {:?}", record.get(ID));
            }
            docs.push(record);
        }
        Ok(count)
    }

    async fn upsert_by_id(&self, record: Document) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let Some(id) = record.get(ID) else {
            bail!("record has no {ID}");
        };
        let mut docs = self.lock();
        match docs.iter_mut().find(|d| d.get(ID) == Some(id)) {
            Some(existing) => {
                for (key, value) in record {
                    existing.insert(key, value);
                }
            }
            None => docs.push(record),
        }
        Ok(())
    }
}
