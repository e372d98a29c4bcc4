//! Builder for operator-style update documents.
//!
//! An [`UpdateRequest`] accumulates `$set`, `$addToSet` and `$pull` entries, optionally
//! prefixing every field name, and renders them as one update document:
//!
//! ```ignore
//! use docqueue::update::UpdateRequest;
//!
//! let mut update = UpdateRequest::with_prefix("profile.");
//! update.set("name", "Alice").add("tags", "admin").set_updated();
//!
//! queue.apply("users", id, &update).await?;
//! ```

use bson::{Bson, DateTime, Document, doc};
use chrono::Utc;

pub const SET: &str = "$set";
pub const ADD_TO_SET: &str = "$addToSet";
pub const PULL: &str = "$pull";
pub const UNSET: &str = "$unset";

/// Accumulates update operators for a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    operations: Document,
    prefix: String,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request whose field names are all prefixed with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            operations: Document::new(),
            prefix: prefix.into(),
        }
    }

    pub fn set(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push(SET, field, value.into())
    }

    pub fn add(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push(ADD_TO_SET, field, value.into())
    }

    pub fn remove(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push(PULL, field, value.into())
    }

    /// Sets `time.updated` to the current time.
    pub fn set_updated(&mut self) -> &mut Self {
        self.set("time.updated", DateTime::from_chrono(Utc::now()))
    }

    /// Sets `time.ended` to the current time.
    pub fn set_ended(&mut self) -> &mut Self {
        self.set("time.ended", DateTime::from_chrono(Utc::now()))
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.operations
    }

    pub fn into_document(self) -> Document {
        self.operations
    }

    fn push(&mut self, operator: &str, field: &str, value: Bson) -> &mut Self {
        let key = format!("{}{}", self.prefix, field);
        let entries = self
            .operations
            .entry(operator.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));

        if let Bson::Document(entries) = entries {
            entries.insert(key, value);
        }

        self
    }
}

impl From<UpdateRequest> for Document {
    fn from(request: UpdateRequest) -> Self {
        request.into_document()
    }
}

/// Builds an update document holding a single operator entry.
pub fn single(operator: &str, field: &str, value: Bson) -> Document {
    doc! { operator: { field: value } }
}

/// Returns true if the update uses `$` operators rather than replacing the document.
pub fn is_operator_update(update: &Document) -> bool {
    update.keys().any(|key| key.starts_with('$'))
}
