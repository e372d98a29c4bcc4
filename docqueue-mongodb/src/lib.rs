//! MongoDB connection for docqueue.
//!
//! Enable it through the facade crate's `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! docqueue = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docqueue::{queue::DbQueue, mongodb::MongoDbConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = DbQueue::builder().capacity(128).build()?;
//!
//!     for _ in 0..4 {
//!         queue.attach(MongoDbConnection::builder("mongodb://localhost:27017", "app")).await?;
//!     }
//!     queue.run().await;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docqueue_mongodb;

pub mod query;
pub mod store;

pub use store::{MongoDbConnection, MongoDbConnectionBuilder};
