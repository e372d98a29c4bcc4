//! Commands: one operation plus a private, single-use reply channel.
//!
//! [`Command::new`] splits a request into the [`Command`] that travels through the queue
//! and the [`PendingReply`] the submitter awaits. A command is built without touching any
//! connection, so operations can be constructed and inspected independently of execution.

use bson::{Bson, Document};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    connection::Connection,
    error::{DocQueueError, DocQueueResult},
    migrate::MigrationRegistry,
    query::Query,
};

/// A data operation to run against a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Count { collection: String, query: Query },
    /// Reads the first match. Fails with `NotFound` when the count is zero.
    FindOne { collection: String, query: Query },
    /// Reads every match. Fails with `NotFound` when the count is zero.
    Find { collection: String, query: Query },
    Insert { collection: String, document: Document },
    /// Updates the document with the given `_id`.
    UpdateId { collection: String, id: Bson, update: Document },
    /// Updates the first document matching the query's filter.
    Update { collection: String, query: Query, update: Document },
}

impl Operation {
    pub fn collection(&self) -> &str {
        match self {
            Operation::Count { collection, .. }
            | Operation::FindOne { collection, .. }
            | Operation::Find { collection, .. }
            | Operation::Insert { collection, .. }
            | Operation::UpdateId { collection, .. }
            | Operation::Update { collection, .. } => collection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Count { .. } => "count",
            Operation::FindOne { .. } => "find_one",
            Operation::Find { .. } => "find",
            Operation::Insert { .. } => "insert",
            Operation::UpdateId { .. } => "update_id",
            Operation::Update { .. } => "update",
        }
    }

    /// Reads are the only operations whose results pass through the migration engine.
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::FindOne { .. } | Operation::Find { .. })
    }

    /// Runs the operation against `connection`, migrating read results.
    pub async fn execute(
        self,
        connection: &dyn Connection,
        migrations: &MigrationRegistry,
    ) -> DocQueueResult<Reply> {
        match self {
            Operation::Count { collection, query } => {
                Ok(Reply::Count(connection.count(&collection, &query).await?))
            }
            Operation::FindOne { collection, query } => {
                if connection.count(&collection, &query).await? == 0 {
                    return Err(DocQueueError::NotFound(collection));
                }

                let mut document = connection
                    .find_one(&collection, &query)
                    .await?
                    .ok_or_else(|| DocQueueError::NotFound(collection.clone()))?;
                migrations
                    .migrate(&collection, &mut document, connection)
                    .await?;

                Ok(Reply::Document(document))
            }
            Operation::Find { collection, query } => {
                if connection.count(&collection, &query).await? == 0 {
                    return Err(DocQueueError::NotFound(collection));
                }

                let mut documents = connection.find(&collection, &query).await?;
                if documents.is_empty() {
                    return Err(DocQueueError::NotFound(collection));
                }
                for document in documents.iter_mut() {
                    migrations
                        .migrate(&collection, document, connection)
                        .await?;
                }

                Ok(Reply::Documents(documents))
            }
            Operation::Insert { collection, document } => {
                connection.insert(&collection, document).await?;
                Ok(Reply::Done)
            }
            Operation::UpdateId { collection, id, update } => {
                connection.update_id(&collection, &id, update).await?;
                Ok(Reply::Done)
            }
            Operation::Update { collection, query, update } => {
                connection.update(&collection, &query, update).await?;
                Ok(Reply::Done)
            }
        }
    }
}

/// The successful result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Count(u64),
    Document(Document),
    Documents(Vec<Document>),
    Done,
}

impl Reply {
    pub fn into_count(self) -> DocQueueResult<u64> {
        match self {
            Reply::Count(count) => Ok(count),
            other => Err(mismatch("count", &other)),
        }
    }

    pub fn into_document(self) -> DocQueueResult<Document> {
        match self {
            Reply::Document(document) => Ok(document),
            other => Err(mismatch("document", &other)),
        }
    }

    pub fn into_documents(self) -> DocQueueResult<Vec<Document>> {
        match self {
            Reply::Documents(documents) => Ok(documents),
            other => Err(mismatch("documents", &other)),
        }
    }

    pub fn into_done(self) -> DocQueueResult<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(mismatch("done", &other)),
        }
    }
}

fn mismatch(expected: &str, actual: &Reply) -> DocQueueError {
    DocQueueError::Driver(format!("expected a {expected} reply, got {actual:?}"))
}

/// An operation bound to the reply channel of the caller that submitted it.
#[derive(Debug)]
pub struct Command {
    operation: Operation,
    reply: oneshot::Sender<DocQueueResult<Reply>>,
}

impl Command {
    pub fn new(operation: Operation) -> (Self, PendingReply) {
        let (reply, receiver) = oneshot::channel();

        (Self { operation, reply }, PendingReply { receiver })
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Executes the command and delivers its result. Never fails: every outcome, including
    /// a panic inside the operation, goes to the reply channel.
    pub(crate) async fn run(self, connection: &dyn Connection, migrations: &MigrationRegistry) {
        let Command { operation, reply } = self;
        let collection = operation.collection().to_string();
        let kind = operation.kind();

        let result = AssertUnwindSafe(operation.execute(connection, migrations))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(DocQueueError::Driver(format!("{kind} on {collection} panicked")))
            });
        debug!(collection = %collection, kind, ok = result.is_ok(), "executed command");

        if reply.send(result).is_err() {
            warn!(collection = %collection, kind, "caller went away before its reply was delivered");
        }
    }
}

/// The submitter's half of a [`Command`].
#[derive(Debug)]
pub struct PendingReply {
    receiver: oneshot::Receiver<DocQueueResult<Reply>>,
}

impl PendingReply {
    /// Waits for the command's result.
    ///
    /// # Errors
    ///
    /// Returns the command's own error, or [`DocQueueError::QueueClosed`] if the command was
    /// dropped without being executed.
    pub async fn wait(self) -> DocQueueResult<Reply> {
        self.receiver
            .await
            .map_err(|_| DocQueueError::QueueClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{query::Filter, testing::TestConnection};
    use bson::doc;

    #[test]
    fn commands_are_inspectable_without_executing() {
        let (command, _reply) = Command::new(Operation::FindOne {
            collection: "users".into(),
            query: Filter::eq("name", "alice").into(),
        });

        assert_eq!(command.operation().collection(), "users");
        assert_eq!(command.operation().kind(), "find_one");
        assert!(command.operation().is_read());
    }

    #[tokio::test]
    async fn reads_with_zero_matches_fail_before_fetching() {
        let connection = TestConnection::default();

        let err = Operation::FindOne { collection: "users".into(), query: Query::new() }
            .execute(&connection, &MigrationRegistry::new())
            .await
            .unwrap_err();

        assert_eq!(err, DocQueueError::NotFound("users".into()));
        assert_eq!(connection.calls(), vec!["count users"]);
    }

    #[tokio::test]
    async fn reads_paged_past_the_last_match_are_not_found() {
        let connection = TestConnection::counting(2);
        let query = Query::builder().offset(5).build();

        for operation in [
            Operation::FindOne { collection: "users".into(), query: query.clone() },
            Operation::Find { collection: "users".into(), query },
        ] {
            let err = operation
                .execute(&connection, &MigrationRegistry::new())
                .await
                .unwrap_err();

            assert_eq!(err, DocQueueError::NotFound("users".into()));
        }
    }

    #[tokio::test]
    async fn run_delivers_the_result_to_the_pending_reply() {
        let connection = TestConnection::with_documents(vec![doc! { "_id": 1 }]);
        let (command, reply) = Command::new(Operation::Find {
            collection: "users".into(),
            query: Query::new(),
        });

        command.run(&connection, &MigrationRegistry::new()).await;

        assert_eq!(
            reply.wait().await.unwrap(),
            Reply::Documents(vec![doc! { "_id": 1 }])
        );
    }

    #[tokio::test]
    async fn dropped_commands_report_queue_closed() {
        let (command, reply) = Command::new(Operation::Count {
            collection: "users".into(),
            query: Query::new(),
        });
        drop(command);

        assert_eq!(reply.wait().await, Err(DocQueueError::QueueClosed));
    }

    #[test]
    fn mismatched_replies_are_errors() {
        assert_eq!(Reply::Count(3).into_count(), Ok(3));
        assert!(Reply::Done.into_document().is_err());
    }
}
