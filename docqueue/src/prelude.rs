//! Commonly used types, for glob import:
//!
//! ```ignore
//! use docqueue::prelude::*;
//! ```

pub use docqueue_core::{
    collection::{Collection, TypedCollection},
    command::{Command, Operation, PendingReply, Reply},
    connection::{Connection, ConnectionBuilder},
    document::{Record, RecordExt, Ref, check_id, make_id},
    error::{DocQueueError, DocQueueResult},
    migrate::{
        DependencyFailure, FnMigration, Migration, MigrationRef, MigrationRegistry, set_version,
    },
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, Sort, SortDirection},
    queue::{DbQueue, DbQueueBuilder, QueueConfig},
    update::UpdateRequest,
};
