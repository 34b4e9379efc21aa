//! Subscriber datastore access
//!
//! [`StoreConnector`] hands out one [`SubscriberStore`] per datastore URI and
//! keeps it for later passes, so the driver's connection pool survives
//! across reconciles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document};
use dashmap::DashMap;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use open5gs_common::{Error, OPERATOR_NAME, SUBSCRIBER_COLLECTION, SUBSCRIBER_DATABASE};

use crate::record::key_filter;

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Keyed subscriber records in one datastore
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Read the record keyed by `imsi`, without the datastore's `_id`
    async fn find(&self, imsi: &str) -> Result<Option<Document>, Error>;

    /// Create or overwrite the record keyed by `imsi`
    async fn upsert(&self, imsi: &str, record: Document) -> Result<(), Error>;

    /// Delete the record keyed by `imsi`. Returns whether a record existed;
    /// an absent record is not an error.
    async fn delete(&self, imsi: &str) -> Result<bool, Error>;
}

/// Opens stores by datastore URI
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Store for `uri`, reusing an existing connection when there is one
    async fn connect(&self, uri: &str) -> Result<Arc<dyn SubscriberStore>, Error>;
}

/// [`SubscriberStore`] over a MongoDB collection
pub struct MongoSubscriberStore {
    uri: String,
    collection: Collection<Document>,
}

impl MongoSubscriberStore {
    fn new(uri: &str, client: &Client) -> Self {
        Self {
            uri: uri.to_string(),
            collection: client
                .database(SUBSCRIBER_DATABASE)
                .collection(SUBSCRIBER_COLLECTION),
        }
    }

    fn error(&self, e: mongodb::error::Error) -> Error {
        Error::datastore(&self.uri, e.to_string())
    }
}

#[async_trait]
impl SubscriberStore for MongoSubscriberStore {
    async fn find(&self, imsi: &str) -> Result<Option<Document>, Error> {
        let found = self
            .collection
            .find_one(key_filter(imsi))
            .projection(doc! { "_id": 0 })
            .await
            .map_err(|e| self.error(e))?;
        Ok(found)
    }

    async fn upsert(&self, imsi: &str, record: Document) -> Result<(), Error> {
        let result = self
            .collection
            .replace_one(key_filter(imsi), record)
            .upsert(true)
            .await
            .map_err(|e| self.error(e))?;
        debug!(
            imsi,
            matched = result.matched_count,
            inserted = result.upserted_id.is_some(),
            "subscriber upserted"
        );
        Ok(())
    }

    async fn delete(&self, imsi: &str) -> Result<bool, Error> {
        let result = self
            .collection
            .delete_one(key_filter(imsi))
            .await
            .map_err(|e| self.error(e))?;
        Ok(result.deleted_count > 0)
    }
}

/// [`StoreConnector`] caching one MongoDB client per URI
#[derive(Default)]
pub struct MongoStoreConnector {
    stores: DashMap<String, Arc<MongoSubscriberStore>>,
}

impl MongoStoreConnector {
    /// Create a connector with an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreConnector for MongoStoreConnector {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn SubscriberStore>, Error> {
        if let Some(store) = self.stores.get(uri) {
            let store: Arc<dyn SubscriberStore> = store.clone();
            return Ok(store);
        }

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| Error::datastore(uri, e.to_string()))?;
        options.app_name = Some(OPERATOR_NAME.to_string());
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        let client =
            Client::with_options(options).map_err(|e| Error::datastore(uri, e.to_string()))?;
        info!(uri, "opened datastore client");

        // a concurrent pass may have raced us here; keep whichever landed first
        let store: Arc<dyn SubscriberStore> = self
            .stores
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(MongoSubscriberStore::new(uri, &client)))
            .clone();
        Ok(store)
    }
}
