//! MongoDB connection.
//!
//! Documents are stored and returned exactly as given, `_id` included. Filters are
//! translated by [`MongoQueryTranslator`]; paging and sorting map onto the driver's find
//! options.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOneOptions, FindOptions},
    results::UpdateResult,
};
use tracing::{debug, info};

use docqueue_core::{
    connection::{Connection, ConnectionBuilder},
    document::ID_FIELD,
    error::{DocQueueError, DocQueueResult},
    query::Query,
    update::is_operator_update,
};

use crate::query::MongoQueryTranslator;

fn driver(err: mongodb::error::Error) -> DocQueueError {
    DocQueueError::Driver(err.to_string())
}

/// A [`Connection`] to one MongoDB database.
#[derive(Debug)]
pub struct MongoDbConnection {
    client: Client,
    database: String,
}

impl MongoDbConnection {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbConnectionBuilder {
        MongoDbConnectionBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection)
    }

    /// Replacement documents go through `replace_one`, operator documents through
    /// `update_one`.
    async fn apply(&self, collection: &str, filter: Document, update: Document) -> DocQueueResult<UpdateResult> {
        let collection = self.get_collection(collection);

        if is_operator_update(&update) {
            collection.update_one(filter, update).await.map_err(driver)
        } else {
            collection.replace_one(filter, update).await.map_err(driver)
        }
    }
}

#[async_trait]
impl Connection for MongoDbConnection {
    async fn count(&self, collection: &str, query: &Query) -> DocQueueResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::filter(query)?)
            .await
            .map_err(driver)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DocQueueResult<Option<Document>> {
        let mut options = FindOneOptions::default();
        options.sort = MongoQueryTranslator::sort(query);
        options.skip = query.offset.map(|skip| skip as u64);

        self.get_collection(collection)
            .find_one(MongoQueryTranslator::filter(query)?)
            .with_options(options)
            .await
            .map_err(driver)
    }

    async fn find(&self, collection: &str, query: &Query) -> DocQueueResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.sort = MongoQueryTranslator::sort(query);
        options.skip = query.offset.map(|skip| skip as u64);
        options.limit = query.limit.map(|limit| limit as i64);

        self.get_collection(collection)
            .find(MongoQueryTranslator::filter(query)?)
            .with_options(options)
            .await
            .map_err(driver)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(driver)
    }

    async fn insert(&self, collection: &str, document: Document) -> DocQueueResult<()> {
        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(driver)?;

        Ok(())
    }

    async fn update_id(&self, collection: &str, id: &Bson, update: Document) -> DocQueueResult<()> {
        let result = self
            .apply(collection, doc! { ID_FIELD: id.clone() }, update)
            .await?;

        if result.matched_count == 0 {
            return Err(DocQueueError::Driver(format!(
                "no document with _id {id} in collection {collection}"
            )));
        }

        Ok(())
    }

    async fn update(&self, collection: &str, query: &Query, update: Document) -> DocQueueResult<()> {
        let result = self
            .apply(collection, MongoQueryTranslator::filter(query)?, update)
            .await?;

        if result.matched_count == 0 {
            return Err(DocQueueError::Driver(format!(
                "no document matches the update filter in collection {collection}"
            )));
        }

        Ok(())
    }

    async fn shutdown(self: Box<Self>) -> DocQueueResult<()> {
        debug!(database = %self.database, "closing MongoDB client");
        self.client.shutdown().await;

        Ok(())
    }
}

/// Dials MongoDB and verifies the deployment answers a `ping`.
#[derive(Debug)]
pub struct MongoDbConnectionBuilder {
    dsn: String,
    database: String,
}

impl MongoDbConnectionBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl ConnectionBuilder for MongoDbConnectionBuilder {
    type Connection = MongoDbConnection;

    async fn build(self) -> DocQueueResult<Self::Connection> {
        let connectivity = |err: mongodb::error::Error| DocQueueError::Connectivity(err.to_string());

        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(connectivity)?,
        )
        .map_err(connectivity)?;

        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connectivity)?;
        info!(database = %self.database, "connected to MongoDB");

        Ok(MongoDbConnection::new(client, self.database))
    }
}
