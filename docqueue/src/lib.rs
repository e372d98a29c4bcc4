//! Bounded, multi-connection command queue for document stores.
//!
//! Callers push data operations into a [`DbQueue`](queue::DbQueue); one worker per
//! attached connection executes them and sends each result back to its submitter. Reads
//! are upgraded on the fly by per-collection migration chains, so stored documents of any
//! schema version come back in the latest shape.
//!
//! # Quick Start
//!
//! ```ignore
//! use docqueue::{prelude::*, memory::MemoryConnectionBuilder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: i64,
//!     pub name: String,
//!     pub active: bool,
//! }
//!
//! impl Record for User {
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocQueueResult<()> {
//!     // Version "" documents predate the `active` flag.
//!     let migrations = MigrationRegistry::builder()
//!         .register("users", vec![
//!             Box::new(FnMigration::new("", |doc, next| {
//!                 doc.insert("active", true);
//!                 set_version(doc, next);
//!             })),
//!             Box::new(FnMigration::new("1", |_, _| {})),
//!         ])
//!         .build()?;
//!
//!     let queue = DbQueue::builder().capacity(32).migrations(migrations).build()?;
//!     queue.attach(MemoryConnectionBuilder::new()).await?;
//!     queue.run().await;
//!
//!     queue.insert("users", bson::doc! { "_id": 1, "name": "Alice" }).await?;
//!
//!     let alice = queue.typed::<User>().find_one(Filter::eq("name", "Alice")).await?;
//!     assert!(alice.active);
//!
//!     queue.shutdown().await
//! }
//! ```
//!
//! # Updates
//!
//! ```ignore
//! let mut update = UpdateRequest::new();
//! update.set("name", "Alicia").add("roles", "admin").set_updated();
//!
//! queue.apply("users", 1, &update).await?;
//! queue.update_remove("users", 1, "roles", "guest").await?;
//! ```
//!
//! # Configuration
//!
//! [`QueueConfig`](queue::QueueConfig) deserializes with serde, so queue settings can live
//! next to the rest of an application's configuration:
//!
//! ```ignore
//! let config: QueueConfig = serde_json::from_str(r#"{ "capacity": 256, "dependency_failure": "propagate" }"#)?;
//! let queue = DbQueue::builder().config(config).migrations(migrations).build()?;
//! ```
//!
//! # Connections
//!
//! - [`memory`] - in-process store for development and testing
//! - [`mongodb`] - MongoDB via the official driver (requires the `mongodb` feature)

pub mod prelude;

pub use docqueue_core::{
    collection, command, connection, document, error, migrate, query, queue, update,
};

pub use bson;

/// In-memory connections.
pub mod memory {
    pub use docqueue_memory::{MemoryConnection, MemoryConnectionBuilder};
}

/// MongoDB connections.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docqueue_mongodb::{MongoDbConnection, MongoDbConnectionBuilder};
}
