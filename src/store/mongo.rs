use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::time::Duration;
use tracing::{debug, info};

use super::{RecordSink, RecordSource};
use crate::record::{DateRange, ID};

pub const DATABASE: &str = "ts";
pub const COLLECTION: &str = "temphums";

/// Upper bound on establishing a connection. Later operations are unbounded.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected client scoped to the `ts.temphums` collection.
pub struct MongoStore {
    client: Client,
    collection: Collection<Document>,
}

impl MongoStore {
    /// Connects and pings the deployment, giving up after [`CONNECT_TIMEOUT`].
    ///
    /// `role` only labels log lines and errors; the URI is never logged
    /// because it usually carries credentials.
    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str, role: &str) -> Result<Self> {
        let connect = async {
            let mut options = ClientOptions::parse(uri)
                .await
                .with_context(|| format!("Invalid {role} MongoDB connection string"))?;
            options.connect_timeout = Some(CONNECT_TIMEOUT);
            options.server_selection_timeout = Some(CONNECT_TIMEOUT);

            let client = Client::with_options(options)
                .with_context(|| format!("Failed to create {role} MongoDB client"))?;
            client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .with_context(|| format!("Failed to ping {role} MongoDB"))?;
            Ok::<_, anyhow::Error>(client)
        };

        let client = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| {
                anyhow!(
                    "Timed out connecting to {role} MongoDB after {}s",
                    CONNECT_TIMEOUT.as_secs()
                )
            })??;

        info!(database = DATABASE, collection = COLLECTION, "Connected to MongoDB");
        let collection = client.database(DATABASE).collection(COLLECTION);
        Ok(Self { client, collection })
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Closes the client's connection pool.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        debug!("MongoDB client shut down");
    }
}

#[async_trait]
impl RecordSource for MongoStore {
    async fn find_in_range(&self, range: &DateRange) -> Result<Vec<Document>> {
        let mut cursor = self
            .collection
            .find(range.to_filter())
            .await
            .context("Failed to query records")?;

        let mut records = Vec::new();
        while cursor.advance().await.context("Failed to read query cursor")? {
            records.push(
                cursor
                    .deserialize_current()
                    .context("Failed to decode record")?,
            );
        }
        debug!(count = records.len(), "Records fetched");
        Ok(records)
    }
}

#[async_trait]
impl RecordSink for MongoStore {
    async fn insert_many(&self, records: Vec<Document>) -> Result<usize> {
        let result = self
            .collection
            .insert_many(records)
            .await
            .context("Failed to insert records")?;
        Ok(result.inserted_ids.len())
    }

    async fn upsert_by_id(&self, record: Document) -> Result<()> {
        let id = record
            .get(ID)
            .cloned()
            .ok_or_else(|| anyhow!("record has no {ID}"))?;
        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": record })
            .upsert(true)
            .await
            .context("Failed to upsert record")?;
        Ok(())
    }
}
