//! In-memory connection.
//!
//! Collections are vectors of documents in insertion order, behind an async-aware
//! read-write lock. Clones share the same data, so several connections attached to one
//! queue see each other's writes.

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use docqueue_core::{
    connection::{Connection, ConnectionBuilder},
    document::ID_FIELD,
    error::{DocQueueError, DocQueueResult},
    query::{Query, SortDirection},
};

use crate::{
    evaluator::{DocumentEvaluator, compare_keys, lookup, values_equal},
    update::apply_update,
};

type Collections = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory [`Connection`].
///
/// Filters scan every document in the collection; there are no indexes.
///
/// # Example
///
/// ```ignore
/// use docqueue_memory::MemoryConnection;
///
/// let connection = MemoryConnection::new();
/// queue.attach_connection(connection.clone()).await;
/// queue.attach(MemoryConnection::builder().sharing(&connection)).await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryConnection {
    store: Arc<RwLock<Collections>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryConnectionBuilder {
        MemoryConnectionBuilder::default()
    }

    /// Snapshot of a collection in insertion order, without migration.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

/// Applies the query's filter, sort, offset and limit.
fn select<'a>(documents: &'a [Document], query: &Query) -> DocQueueResult<Vec<&'a Document>> {
    let mut selected = Vec::new();
    for document in documents {
        if DocumentEvaluator::matches(document, query.filter.as_ref())? {
            selected.push(document);
        }
    }

    if let Some(sort) = &query.sort {
        selected.sort_by(|a, b| {
            let ordering = compare_keys(lookup(a, &sort.field), lookup(b, &sort.field));

            match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }

    Ok(selected
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect())
}

fn has_id(document: &Document, id: &Bson) -> bool {
    document
        .get(ID_FIELD)
        .is_some_and(|stored| values_equal(stored, id))
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn count(&self, collection: &str, query: &Query) -> DocQueueResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in documents {
            if DocumentEvaluator::matches(document, query.filter.as_ref())? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DocQueueResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(None);
        };

        let query = Query { limit: Some(1), ..query.clone() };
        Ok(select(documents, &query)?.into_iter().next().cloned())
    }

    async fn find(&self, collection: &str, query: &Query) -> DocQueueResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(select(documents, query)?.into_iter().cloned().collect())
    }

    async fn insert(&self, collection: &str, document: Document) -> DocQueueResult<()> {
        let document = match document.get(ID_FIELD) {
            Some(_) => document,
            None => {
                let mut stored = doc! { ID_FIELD: ObjectId::new() };
                for (key, value) in document {
                    stored.insert(key, value);
                }
                stored
            }
        };

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        if let Some(id) = document.get(ID_FIELD) {
            if documents.iter().any(|existing| has_id(existing, id)) {
                return Err(DocQueueError::Driver(format!(
                    "duplicate _id {id} in collection {collection}"
                )));
            }
        }

        documents.push(document);
        Ok(())
    }

    async fn update_id(&self, collection: &str, id: &Bson, update: Document) -> DocQueueResult<()> {
        let mut store = self.store.write().await;
        let target = store
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|document| has_id(document, id)))
            .ok_or_else(|| {
                DocQueueError::Driver(format!("no document with _id {id} in collection {collection}"))
            })?;

        *target = apply_update(target, update)?;
        Ok(())
    }

    async fn update(&self, collection: &str, query: &Query, update: Document) -> DocQueueResult<()> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Err(DocQueueError::Driver(format!(
                "no document matches the update filter in collection {collection}"
            )));
        };

        for document in documents.iter_mut() {
            if DocumentEvaluator::matches(document, query.filter.as_ref())? {
                *document = apply_update(document, update)?;
                return Ok(());
            }
        }

        Err(DocQueueError::Driver(format!(
            "no document matches the update filter in collection {collection}"
        )))
    }
}

/// Builds [`MemoryConnection`]s, either over a fresh store or sharing an existing one.
#[derive(Default, Debug)]
pub struct MemoryConnectionBuilder {
    shared: Option<MemoryConnection>,
}

impl MemoryConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built connection will see the same data as `connection`.
    pub fn sharing(mut self, connection: &MemoryConnection) -> Self {
        self.shared = Some(connection.clone());
        self
    }
}

#[async_trait]
impl ConnectionBuilder for MemoryConnectionBuilder {
    type Connection = MemoryConnection;

    /// Always succeeds.
    async fn build(self) -> DocQueueResult<Self::Connection> {
        Ok(self.shared.unwrap_or_default())
    }
}
