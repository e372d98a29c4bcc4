//! Core of the docqueue project: a bounded, multi-connection command queue in front of a
//! document store, with lazy per-collection schema migration on read.
//!
//! - **Queue** ([`queue`]) - bounded command channel, one worker per attached connection
//! - **Commands** ([`command`]) - operations and their single-use reply channels
//! - **Connections** ([`connection`]) - the traits a backing store implements
//! - **Migrations** ([`migrate`]) - ordered per-collection upgrade chains
//! - **Queries** ([`query`]) - backend-neutral filter expressions and read options
//! - **Updates** ([`update`]) - operator update documents
//! - **Documents** ([`document`]) - typed records, versions and identifiers
//! - **Collections** ([`collection`]) - per-collection handles over the queue
//! - **Errors** ([`error`])
//!
//! # Example
//!
//! ```ignore
//! use docqueue_core::{migrate::{FnMigration, MigrationRegistry, set_version}, queue::DbQueue};
//!
//! let registry = MigrationRegistry::builder()
//!     .register("users", vec![
//!         Box::new(FnMigration::new("", |doc, next| {
//!             doc.insert("active", true);
//!             set_version(doc, next);
//!         })),
//!         Box::new(FnMigration::new("1", |_, _| {})),
//!     ])
//!     .build()?;
//!
//! let queue = DbQueue::builder().capacity(16).migrations(registry).build()?;
//! queue.attach(builder).await?;
//! queue.run().await;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docqueue_core;

pub mod collection;
pub mod command;
pub mod connection;
pub mod document;
pub mod error;
pub mod migrate;
pub mod query;
pub mod queue;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;
