//! Error types and result types for queued document operations.
//!
//! Every outcome of a queued command reaches its caller through the command's reply
//! channel as a [`DocQueueResult<T>`]. Nothing is retried and nothing is dropped.

use bson::error::Error as BsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when working with the queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocQueueError {
    /// A read matched zero documents. The argument is the collection name.
    #[error("No document found in collection {0}")]
    NotFound(String),
    /// A connection could not be established while attaching it to the queue.
    #[error("Connectivity error: {0}")]
    Connectivity(String),
    /// The backing store failed while executing a command.
    #[error("Driver error: {0}")]
    Driver(String),
    /// A migration's dependency step failed and the registry is set to propagate it.
    #[error("Migration dependency failed for {id} in collection {collection}: {message}")]
    MigrationDependency {
        collection: String,
        id: String,
        message: String,
    },
    /// A migration chain is inconsistent: duplicate versions, or a transform moved a
    /// document backwards along its chain.
    #[error("Malformed migration chain: {0}")]
    MalformedMigrationChain(String),
    /// Serialization/deserialization error when converting between BSON and Rust types.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The document violates structural constraints (e.g. an unsupported update operator).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A string could not be turned into a document identifier.
    #[error("Invalid id: {0}")]
    InvalidId(String),
    /// Invalid queue configuration.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The queue was shut down, or the worker holding a command went away before replying.
    #[error("Queue closed")]
    QueueClosed,
}

/// A specialized `Result` type for queue operations.
pub type DocQueueResult<T> = Result<T, DocQueueError>;

impl From<BsonError> for DocQueueError {
    fn from(err: BsonError) -> Self {
        DocQueueError::Serialization(err.to_string())
    }
}
