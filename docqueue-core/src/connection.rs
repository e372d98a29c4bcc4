//! Backing store connections.
//!
//! A [`Connection`] is one session with a document store. The queue hands every attached
//! connection to exactly one worker, which owns it until the queue shuts down, so
//! implementations never see concurrent calls from the queue itself. They must still be
//! `Send + Sync`: migration dependencies receive a shared reference to the worker's
//! connection.
//!
//! The trait covers only the driver primitives the queue needs. Query semantics belong
//! to the backend; the queue never interprets a [`Query`].
//!
//! # Implementations
//!
//! - `docqueue_memory::MemoryConnection` - in-process store for tests and development
//! - `docqueue_mongodb::MongoDbConnection` - MongoDB via the official async driver

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::DocQueueResult, query::Query};

#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// Counts documents matching the query's filter. Paging options are ignored, so a
    /// non-zero count can still be followed by an empty page; the queue reports both
    /// cases as not found.
    async fn count(&self, collection: &str, query: &Query) -> DocQueueResult<u64>;

    /// Returns the first document matching the query, honouring its sort and offset.
    async fn find_one(&self, collection: &str, query: &Query) -> DocQueueResult<Option<Document>>;

    /// Returns every document matching the query, honouring sort, offset and limit. An
    /// offset past the last match yields an empty vector.
    async fn find(&self, collection: &str, query: &Query) -> DocQueueResult<Vec<Document>>;

    /// Inserts one document. Backends assign an `_id` when the document has none.
    async fn insert(&self, collection: &str, document: Document) -> DocQueueResult<()>;

    /// Applies an update to the document with the given `_id`.
    ///
    /// `update` is either an operator document (`$set`, `$addToSet`, `$pull`, ...) or a
    /// full replacement. Fails with a driver error if no document has that id.
    async fn update_id(&self, collection: &str, id: &Bson, update: Document) -> DocQueueResult<()>;

    /// Applies an update to the first document matching the query's filter.
    async fn update(&self, collection: &str, query: &Query, update: Document) -> DocQueueResult<()>;

    /// Releases the connection. Called by the owning worker once the queue is closed.
    async fn shutdown(self: Box<Self>) -> DocQueueResult<()> {
        Ok(())
    }
}

/// Factory for connections; dialing happens in [`build`](ConnectionBuilder::build).
#[async_trait]
pub trait ConnectionBuilder: Send {
    type Connection: Connection + 'static;

    /// Dials the store.
    ///
    /// # Errors
    ///
    /// Implementations report dial failures as
    /// [`DocQueueError::Connectivity`](crate::error::DocQueueError::Connectivity).
    async fn build(self) -> DocQueueResult<Self::Connection>;
}
