//! Connections for unit tests.

use async_trait::async_trait;
use bson::{Bson, Document};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::Semaphore;

use crate::{
    connection::Connection,
    error::{DocQueueError, DocQueueResult},
    query::Query,
};

/// Matches nothing and accepts every write.
#[derive(Debug, Default)]
pub(crate) struct NullConnection;

#[async_trait]
impl Connection for NullConnection {
    async fn count(&self, _collection: &str, _query: &Query) -> DocQueueResult<u64> {
        Ok(0)
    }

    async fn find_one(&self, _collection: &str, _query: &Query) -> DocQueueResult<Option<Document>> {
        Ok(None)
    }

    async fn find(&self, _collection: &str, _query: &Query) -> DocQueueResult<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _collection: &str, _document: Document) -> DocQueueResult<()> {
        Ok(())
    }

    async fn update_id(&self, _collection: &str, _id: &Bson, _update: Document) -> DocQueueResult<()> {
        Ok(())
    }

    async fn update(&self, _collection: &str, _query: &Query, _update: Document) -> DocQueueResult<()> {
        Ok(())
    }
}

/// Serves a fixed document set and records every call as `"<op> <collection>"`.
///
/// Inserts into `broken` fail with a driver error, inserts into `panics` panic. When a gate
/// is set, each call consumes one permit before it runs. `counting` makes `count` report
/// matches that the fetch calls do not return, as when an offset skips past them.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestConnection {
    documents: Vec<Document>,
    calls: Arc<Mutex<Vec<String>>>,
    shutdowns: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    matches: Option<u64>,
    failing_shutdown: bool,
}

impl TestConnection {
    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self { documents, ..Self::default() }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn counting(matches: u64) -> Self {
        Self { matches: Some(matches), ..Self::default() }
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.failing_shutdown = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    async fn record(&self, call: String) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Connection for TestConnection {
    async fn count(&self, collection: &str, _query: &Query) -> DocQueueResult<u64> {
        self.record(format!("count {collection}")).await;
        Ok(self.matches.unwrap_or(self.documents.len() as u64))
    }

    async fn find_one(&self, collection: &str, _query: &Query) -> DocQueueResult<Option<Document>> {
        self.record(format!("find_one {collection}")).await;
        Ok(self.documents.first().cloned())
    }

    async fn find(&self, collection: &str, _query: &Query) -> DocQueueResult<Vec<Document>> {
        self.record(format!("find {collection}")).await;
        Ok(self.documents.clone())
    }

    async fn insert(&self, collection: &str, document: Document) -> DocQueueResult<()> {
        match document.get("n") {
            Some(n) => self.record(format!("insert {collection} {n}")).await,
            None => self.record(format!("insert {collection}")).await,
        }

        match collection {
            "broken" => Err(DocQueueError::Driver("insert rejected".into())),
            "panics" => panic!("connection blew up"),
            _ => Ok(()),
        }
    }

    async fn update_id(&self, collection: &str, _id: &Bson, _update: Document) -> DocQueueResult<()> {
        self.record(format!("update_id {collection}")).await;
        Ok(())
    }

    async fn update(&self, collection: &str, _query: &Query, _update: Document) -> DocQueueResult<()> {
        self.record(format!("update {collection}")).await;
        Ok(())
    }

    async fn shutdown(self: Box<Self>) -> DocQueueResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);

        match self.failing_shutdown {
            true => Err(DocQueueError::Driver("close failed".into())),
            false => Ok(()),
        }
    }
}
