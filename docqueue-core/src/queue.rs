//! The bounded command queue and its worker pool.
//!
//! A [`DbQueue`] owns one bounded channel of [`Command`]s. Every attached connection gets
//! exactly one worker task; workers share the receiving end and pull commands one at a
//! time, so the number of commands in flight never exceeds the number of connections and
//! the number waiting never exceeds the queue's capacity. Submitters block (asynchronously)
//! while the queue is full.
//!
//! ```ignore
//! use docqueue::{queue::DbQueue, memory::MemoryConnectionBuilder, query::Filter};
//!
//! let queue = DbQueue::builder().capacity(32).migrations(registry).build()?;
//! queue.attach(MemoryConnectionBuilder::new()).await?;
//! queue.run().await;
//!
//! let user = queue.find_one("users", Filter::eq("name", "alice")).await?;
//! queue.shutdown().await?;
//! ```

use bson::{Bson, Document, de::deserialize_from_document};
use mea::mutex::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    collection::{Collection, TypedCollection},
    command::{Command, Operation, Reply},
    connection::{Connection, ConnectionBuilder},
    document::Record,
    error::{DocQueueError, DocQueueResult},
    migrate::{DependencyFailure, MigrationRegistry},
    query::Query,
    update::{self, ADD_TO_SET, PULL, SET, UpdateRequest},
};

pub const DEFAULT_CAPACITY: usize = 64;

/// Queue settings that can be loaded from a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of commands waiting for a worker.
    pub capacity: usize,
    /// What a failed migration dependency does to the read that triggered it.
    pub dependency_failure: DependencyFailure,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dependency_failure: DependencyFailure::default(),
        }
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Command>>>;

#[derive(Default)]
struct QueueState {
    running: bool,
    parked: Vec<Box<dyn Connection>>,
    workers: Vec<JoinHandle<()>>,
}

/// A bounded, multi-connection command queue.
pub struct DbQueue {
    sender: mpsc::Sender<Command>,
    receiver: SharedReceiver,
    migrations: Arc<MigrationRegistry>,
    state: Mutex<QueueState>,
}

impl fmt::Debug for DbQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbQueue")
            .field("capacity", &self.capacity())
            .field("queued", &self.queued())
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

impl DbQueue {
    pub fn builder() -> DbQueueBuilder {
        DbQueueBuilder::default()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of commands currently waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Number of workers started so far.
    pub async fn workers(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// Dials a connection and attaches it.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::Connectivity`] if the builder fails. Nothing is retried.
    pub async fn attach<B: ConnectionBuilder>(&self, builder: B) -> DocQueueResult<()> {
        let connection = builder.build().await.map_err(|err| match err {
            DocQueueError::Connectivity(_) => err,
            other => DocQueueError::Connectivity(other.to_string()),
        })?;

        self.attach_connection(connection).await;
        Ok(())
    }

    /// Attaches an established connection. Once the queue is running, its worker starts
    /// immediately; before that, the connection waits for [`run`](Self::run).
    pub async fn attach_connection(&self, connection: impl Connection + 'static) {
        let mut state = self.state.lock().await;

        if state.running {
            self.spawn_worker(&mut state, Box::new(connection));
        } else {
            state.parked.push(Box::new(connection));
            info!(parked = state.parked.len(), "connection attached, waiting for run");
        }
    }

    /// Starts one worker per attached connection. Calling it again is harmless.
    pub async fn run(&self) {
        let mut state = self.state.lock().await;
        state.running = true;

        for connection in std::mem::take(&mut state.parked) {
            self.spawn_worker(&mut state, connection);
        }

        info!(workers = state.workers.len(), capacity = self.capacity(), "queue running");
    }

    fn spawn_worker(&self, state: &mut QueueState, connection: Box<dyn Connection>) {
        let worker = state.workers.len();
        let handle = tokio::spawn(work(
            worker,
            connection,
            self.receiver.clone(),
            self.migrations.clone(),
        ));

        state.workers.push(handle);
    }

    /// Enqueues a command, waiting while the queue is full. Its result arrives through the
    /// command's [`PendingReply`](crate::command::PendingReply).
    pub async fn submit(&self, command: Command) -> DocQueueResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| DocQueueError::QueueClosed)
    }

    /// Enqueues an operation and waits for its result.
    pub async fn push(&self, operation: Operation) -> DocQueueResult<Reply> {
        let (command, reply) = Command::new(operation);

        self.submit(command).await?;
        reply.wait().await
    }

    /// Closes the queue. Workers finish every command already queued, release their
    /// connections and exit; this waits for all of them.
    ///
    /// # Errors
    ///
    /// Every connection is released and every worker joined even when one fails; the first
    /// failure is returned afterwards.
    pub async fn shutdown(self) -> DocQueueResult<()> {
        let (workers, parked) = {
            let mut state = self.state.lock().await;
            state.running = false;
            (
                std::mem::take(&mut state.workers),
                std::mem::take(&mut state.parked),
            )
        };
        drop(self.sender);

        let mut first_error = None;

        for connection in parked {
            if let Err(err) = connection.shutdown().await {
                warn!(error = %err, "failed to release parked connection");
                first_error.get_or_insert(err);
            }
        }

        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker failed");
                first_error.get_or_insert(DocQueueError::Driver(format!("worker failed: {err}")));
            }
        }

        info!("queue shut down");
        first_error.map_or(Ok(()), Err)
    }

    pub async fn count(&self, collection: &str, query: impl Into<Query>) -> DocQueueResult<u64> {
        self.push(Operation::Count {
            collection: collection.to_string(),
            query: query.into(),
        })
        .await?
        .into_count()
    }

    /// Reads and migrates the first matching document.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::NotFound`] when nothing matches or the offset skips every
    /// match.
    pub async fn find_one(&self, collection: &str, query: impl Into<Query>) -> DocQueueResult<Document> {
        self.push(Operation::FindOne {
            collection: collection.to_string(),
            query: query.into(),
        })
        .await?
        .into_document()
    }

    /// Reads and migrates every matching document.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::NotFound`] when nothing matches or the offset skips every
    /// match.
    pub async fn find(&self, collection: &str, query: impl Into<Query>) -> DocQueueResult<Vec<Document>> {
        self.push(Operation::Find {
            collection: collection.to_string(),
            query: query.into(),
        })
        .await?
        .into_documents()
    }

    /// Like [`find_one`](Self::find_one), decoding the migrated document into `T`.
    ///
    /// Decoding is strict: a field of the wrong type or a missing required field is a
    /// [`DocQueueError::Serialization`] error rather than a zero value.
    pub async fn find_one_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: impl Into<Query>,
    ) -> DocQueueResult<T> {
        let document = self.find_one(collection, query).await?;

        Ok(deserialize_from_document(document)?)
    }

    /// Like [`find`](Self::find), decoding each migrated document into `T`. Decoding is
    /// strict, as in [`find_one_as`](Self::find_one_as); one bad document fails the read.
    pub async fn find_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: impl Into<Query>,
    ) -> DocQueueResult<Vec<T>> {
        self.find(collection, query)
            .await?
            .into_iter()
            .map(|document| deserialize_from_document(document).map_err(DocQueueError::from))
            .collect()
    }

    pub async fn insert(&self, collection: &str, document: Document) -> DocQueueResult<()> {
        self.push(Operation::Insert {
            collection: collection.to_string(),
            document,
        })
        .await?
        .into_done()
    }

    /// Updates the document with the given `_id`. `update` is an operator document or a
    /// full replacement.
    pub async fn update(
        &self,
        collection: &str,
        id: impl Into<Bson>,
        update: impl Into<Document>,
    ) -> DocQueueResult<()> {
        self.push(Operation::UpdateId {
            collection: collection.to_string(),
            id: id.into(),
            update: update.into(),
        })
        .await?
        .into_done()
    }

    /// Updates the first document matching the query's filter.
    pub async fn update_where(
        &self,
        collection: &str,
        query: impl Into<Query>,
        update: impl Into<Document>,
    ) -> DocQueueResult<()> {
        self.push(Operation::Update {
            collection: collection.to_string(),
            query: query.into(),
            update: update.into(),
        })
        .await?
        .into_done()
    }

    pub async fn update_set(
        &self,
        collection: &str,
        id: impl Into<Bson>,
        field: &str,
        value: impl Into<Bson>,
    ) -> DocQueueResult<()> {
        self.update(collection, id, update::single(SET, field, value.into()))
            .await
    }

    /// Adds `value` to the array at `field` unless it is already present.
    pub async fn update_add(
        &self,
        collection: &str,
        id: impl Into<Bson>,
        field: &str,
        value: impl Into<Bson>,
    ) -> DocQueueResult<()> {
        self.update(collection, id, update::single(ADD_TO_SET, field, value.into()))
            .await
    }

    /// Removes every occurrence of `value` from the array at `field`.
    pub async fn update_remove(
        &self,
        collection: &str,
        id: impl Into<Bson>,
        field: &str,
        value: impl Into<Bson>,
    ) -> DocQueueResult<()> {
        self.update(collection, id, update::single(PULL, field, value.into()))
            .await
    }

    /// Applies an accumulated [`UpdateRequest`]. An empty request is a no-op.
    pub async fn apply(
        &self,
        collection: &str,
        id: impl Into<Bson>,
        request: &UpdateRequest,
    ) -> DocQueueResult<()> {
        if request.is_empty() {
            return Ok(());
        }

        self.update(collection, id, request.as_document().clone())
            .await
    }

    pub fn collection(&self, name: &str) -> Collection<'_> {
        Collection::new(name.to_string(), self)
    }

    pub fn typed<R: Record>(&self) -> TypedCollection<'_, R> {
        TypedCollection::new(self)
    }
}

async fn work(
    worker: usize,
    connection: Box<dyn Connection>,
    receiver: SharedReceiver,
    migrations: Arc<MigrationRegistry>,
) {
    info!(worker, "worker started");

    loop {
        // The lock is released at the end of this statement, before the command runs.
        let command = receiver.lock().await.recv().await;
        let Some(command) = command else {
            break;
        };

        command.run(connection.as_ref(), &migrations).await;
    }

    if let Err(err) = connection.shutdown().await {
        warn!(worker, error = %err, "failed to release connection");
    }

    info!(worker, "worker stopped");
}

#[derive(Debug, Default)]
pub struct DbQueueBuilder {
    config: QueueConfig,
    migrations: MigrationRegistry,
}

impl DbQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn dependency_failure(mut self, policy: DependencyFailure) -> Self {
        self.config.dependency_failure = policy;
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    /// # Errors
    ///
    /// Returns [`DocQueueError::Initialization`] if the capacity is zero.
    pub fn build(self) -> DocQueueResult<DbQueue> {
        if self.config.capacity == 0 {
            return Err(DocQueueError::Initialization(
                "queue capacity must be at least 1".into(),
            ));
        }

        let (sender, receiver) = mpsc::channel(self.config.capacity);
        let migrations = self
            .migrations
            .with_dependency_failure(self.config.dependency_failure);

        Ok(DbQueue {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            migrations: Arc::new(migrations),
            state: Mutex::new(QueueState::default()),
        })
    }
}
