//! In-memory connection for docqueue.
//!
//! [`MemoryConnection`] implements the queue's `Connection` trait entirely in process.
//! It is meant for tests, development and small deployments.
//!
//! - **Shared state** - clones and [`MemoryConnectionBuilder::sharing`] see the same data
//! - **Full query support** - dotted-path filters, regex, sorting and paging
//! - **Operator updates** - `$set`, `$unset`, `$addToSet`, `$pull` and full replacement
//!
//! # Quick Start
//!
//! ```ignore
//! use docqueue::{queue::DbQueue, memory::MemoryConnectionBuilder};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = DbQueue::builder().build()?;
//!     queue.attach(MemoryConnectionBuilder::new()).await?;
//!     queue.run().await;
//!
//!     queue.insert("users", doc! { "name": "Alice" }).await?;
//!     let alice = queue.find_one("users", docqueue::query::Filter::eq("name", "Alice")).await?;
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docqueue_memory;

pub mod evaluator;
pub mod store;
mod update;

pub use store::{MemoryConnection, MemoryConnectionBuilder};
