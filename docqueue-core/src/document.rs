//! Core traits and helpers for document representation.
//!
//! Raw documents are plain [`bson::Document`] values: ordered maps from field name to the
//! tagged [`Bson`] value. Two fields carry meaning for this crate:
//!
//! - [`ID_FIELD`] (`_id`) - the document's identity
//! - [`VERSION_FIELD`] (`version`) - the schema version read by the migration engine
//!
//! Typed access goes through the [`Record`] trait, which binds a Rust type to a collection.

use bson::{
    Bson, Document, doc,
    de::deserialize_from_document,
    oid::ObjectId,
    ser::serialize_to_document,
};
use serde::{Deserialize, Serialize};

use crate::error::{DocQueueError, DocQueueResult};

/// Name of the identity field.
pub const ID_FIELD: &str = "_id";

/// Name of the schema version field.
pub const VERSION_FIELD: &str = "version";

/// A Rust type stored as documents of one collection.
///
/// # Example
///
/// ```ignore
/// use docqueue::document::Record;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     #[serde(rename = "_id")]
///     pub id: ObjectId,
///     pub name: String,
/// }
///
/// impl Record for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
/// }
/// ```
pub trait Record: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Returns the name of the collection this record belongs to.
    fn collection_name() -> &'static str;
}

/// Extension trait converting records to and from raw documents.
///
/// Automatically implemented for every [`Record`].
pub trait RecordExt: Record + Sized {
    /// Serializes this record into a raw document.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::Serialization`] if the record does not serialize to a
    /// BSON document.
    fn to_document(&self) -> DocQueueResult<Document>;

    /// Decodes a record from a raw document.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::Serialization`] if the document's shape does not match.
    fn from_document(document: Document) -> DocQueueResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_document(&self) -> DocQueueResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: Document) -> DocQueueResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

/// Reads the schema version of a document.
///
/// A missing or `null` version field is the zero version `""`. Strings are used as-is and
/// integers are read as their decimal form. Any other type yields `None`, which no chain
/// entry can match.
pub fn document_version(document: &Document) -> Option<String> {
    match document.get(VERSION_FIELD) {
        None | Some(Bson::Null) => Some(String::new()),
        Some(Bson::String(version)) => Some(version.clone()),
        Some(Bson::Int32(version)) => Some(version.to_string()),
        Some(Bson::Int64(version)) => Some(version.to_string()),
        Some(_) => None,
    }
}

/// Returns the document's identity, or `Bson::Null` when it has none.
pub fn document_id(document: &Document) -> Bson {
    document
        .get(ID_FIELD)
        .cloned()
        .unwrap_or(Bson::Null)
}

/// A reference to a document in another collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub collection: String,
    pub id: Bson,
}

impl Ref {
    pub fn new(collection: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Renders the reference in DBRef form (`$ref` / `$id`).
    pub fn to_document(&self) -> Document {
        doc! {
            "$ref": self.collection.clone(),
            "$id": self.id.clone(),
        }
    }
}

impl From<Ref> for Bson {
    fn from(reference: Ref) -> Self {
        Bson::Document(reference.to_document())
    }
}

/// Returns true when `id` is a 24 character lowercase hex string.
pub fn check_id(id: &str) -> bool {
    id.len() == 24
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Parses a lowercase hex string into an [`ObjectId`].
///
/// # Errors
///
/// Returns [`DocQueueError::InvalidId`] if the string fails [`check_id`].
pub fn make_id(id: &str) -> DocQueueResult<ObjectId> {
    if !check_id(id) {
        return Err(DocQueueError::InvalidId(id.to_string()));
    }

    ObjectId::parse_str(id).map_err(|e| DocQueueError::InvalidId(e.to_string()))
}
