//! Collection handles over a [`DbQueue`].
//!
//! A handle only fixes the collection name; every call still goes through the queue as
//! one command.
//!
//! - [`Collection`] - raw BSON documents, named at runtime
//! - [`TypedCollection`] - a [`Record`] type, named by [`Record::collection_name`]
//!
//! # Example
//!
//! ```ignore
//! use docqueue::{document::Record, query::Filter};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! impl Record for User {
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! let users = queue.typed::<User>();
//! users.insert(&User { id: 1, name: "Alice".into() }).await?;
//! let alice = users.find_one(Filter::eq("name", "Alice")).await?;
//! ```

use bson::{Bson, Document};
use std::marker::PhantomData;

use crate::{
    document::{Record, RecordExt},
    error::DocQueueResult,
    query::Query,
    queue::DbQueue,
    update::UpdateRequest,
};

/// An untyped collection handle.
#[derive(Debug)]
pub struct Collection<'a> {
    name: String,
    queue: &'a DbQueue,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(name: String, queue: &'a DbQueue) -> Self {
        Self { name, queue }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn count(&self, query: impl Into<Query>) -> DocQueueResult<u64> {
        self.queue.count(&self.name, query).await
    }

    pub async fn find_one(&self, query: impl Into<Query>) -> DocQueueResult<Document> {
        self.queue.find_one(&self.name, query).await
    }

    pub async fn find(&self, query: impl Into<Query>) -> DocQueueResult<Vec<Document>> {
        self.queue.find(&self.name, query).await
    }

    pub async fn insert(&self, document: Document) -> DocQueueResult<()> {
        self.queue.insert(&self.name, document).await
    }

    pub async fn update(&self, id: impl Into<Bson>, update: impl Into<Document>) -> DocQueueResult<()> {
        self.queue.update(&self.name, id, update).await
    }

    pub async fn update_where(
        &self,
        query: impl Into<Query>,
        update: impl Into<Document>,
    ) -> DocQueueResult<()> {
        self.queue.update_where(&self.name, query, update).await
    }

    pub async fn apply(&self, id: impl Into<Bson>, request: &UpdateRequest) -> DocQueueResult<()> {
        self.queue.apply(&self.name, id, request).await
    }
}

/// A collection handle bound to a [`Record`] type.
///
/// Reads decode after migration, so `R` always describes the latest schema.
#[derive(Debug)]
pub struct TypedCollection<'a, R: Record> {
    queue: &'a DbQueue,
    _marker: PhantomData<R>,
}

impl<'a, R: Record> TypedCollection<'a, R> {
    pub(crate) fn new(queue: &'a DbQueue) -> Self {
        Self { queue, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        R::collection_name()
    }

    /// Reinterprets the same collection as a different record type.
    pub fn with_type<T: Record>(&self) -> TypedCollection<'a, T> {
        TypedCollection::new(self.queue)
    }

    pub async fn count(&self, query: impl Into<Query>) -> DocQueueResult<u64> {
        self.queue.count(self.name(), query).await
    }

    /// # Errors
    ///
    /// Returns [`NotFound`](crate::error::DocQueueError::NotFound) when nothing matches and
    /// [`Serialization`](crate::error::DocQueueError::Serialization) when the migrated
    /// document does not decode into `R`.
    pub async fn find_one(&self, query: impl Into<Query>) -> DocQueueResult<R> {
        self.queue.find_one_as(self.name(), query).await
    }

    pub async fn find(&self, query: impl Into<Query>) -> DocQueueResult<Vec<R>> {
        self.queue.find_as(self.name(), query).await
    }

    pub async fn insert(&self, record: &R) -> DocQueueResult<()> {
        self.queue
            .insert(self.name(), record.to_document()?)
            .await
    }

    /// Replaces the stored record that has the given `_id`.
    pub async fn replace(&self, id: impl Into<Bson>, record: &R) -> DocQueueResult<()> {
        self.queue
            .update(self.name(), id, record.to_document()?)
            .await
    }

    pub async fn update(&self, id: impl Into<Bson>, update: impl Into<Document>) -> DocQueueResult<()> {
        self.queue.update(self.name(), id, update).await
    }

    pub async fn apply(&self, id: impl Into<Bson>, request: &UpdateRequest) -> DocQueueResult<()> {
        self.queue.apply(self.name(), id, request).await
    }
}
