//! Applies update documents to stored documents.
//!
//! Supported operators are `$set`, `$unset`, `$addToSet` and `$pull`, each taking a
//! document of dotted paths. An update without operators replaces the whole document but
//! keeps its `_id`.

use bson::{Bson, Document};

use docqueue_core::{
    document::ID_FIELD,
    error::{DocQueueError, DocQueueResult},
    update::{ADD_TO_SET, PULL, SET, UNSET, is_operator_update},
};

use crate::evaluator::values_equal;

/// Returns the updated copy of `document`; the original is left untouched on error.
pub(crate) fn apply_update(document: &Document, update: Document) -> DocQueueResult<Document> {
    if !is_operator_update(&update) {
        let mut replacement = Document::new();
        if let Some(id) = document.get(ID_FIELD) {
            replacement.insert(ID_FIELD, id.clone());
        }
        for (key, value) in update {
            if key != ID_FIELD {
                replacement.insert(key, value);
            }
        }

        return Ok(replacement);
    }

    let mut updated = document.clone();

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocQueueError::InvalidDocument(format!(
                "{operator} expects a document of fields"
            )));
        };

        match operator.as_str() {
            SET => {
                for (path, value) in fields {
                    set_path(&mut updated, &path, value)?;
                }
            }
            UNSET => {
                for (path, _) in fields {
                    unset_path(&mut updated, &path);
                }
            }
            ADD_TO_SET => {
                for (path, value) in fields {
                    add_to_set(&mut updated, &path, value)?;
                }
            }
            PULL => {
                for (path, value) in fields {
                    pull(&mut updated, &path, &value)?;
                }
            }
            other => {
                return Err(DocQueueError::InvalidDocument(format!(
                    "unsupported update operator {other}"
                )));
            }
        }
    }

    Ok(updated)
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> DocQueueResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));

            match child {
                Bson::Document(child) => set_path(child, rest, value),
                _ => Err(DocQueueError::InvalidDocument(format!(
                    "cannot set {rest} inside non-document field {head}"
                ))),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => document.get_mut(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(child) => get_path_mut(child, rest),
            _ => None,
        },
    }
}

fn add_to_set(document: &mut Document, path: &str, value: Bson) -> DocQueueResult<()> {
    if get_path_mut(document, path).is_none() {
        return set_path(document, path, Bson::Array(vec![value]));
    }

    match get_path_mut(document, path) {
        Some(Bson::Array(array)) => {
            if !array.iter().any(|item| values_equal(item, &value)) {
                array.push(value);
            }
            Ok(())
        }
        _ => Err(DocQueueError::InvalidDocument(format!(
            "{ADD_TO_SET} target {path} is not an array"
        ))),
    }
}

fn pull(document: &mut Document, path: &str, value: &Bson) -> DocQueueResult<()> {
    match get_path_mut(document, path) {
        None => Ok(()),
        Some(Bson::Array(array)) => {
            array.retain(|item| !values_equal(item, value));
            Ok(())
        }
        Some(_) => Err(DocQueueError::InvalidDocument(format!(
            "{PULL} target {path} is not an array"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_creates_intermediate_documents() {
        let updated = apply_update(
            &doc! { "_id": 1 },
            doc! { "$set": { "profile.name": "alice", "active": true } },
        )
        .unwrap();

        assert_eq!(updated, doc! { "_id": 1, "profile": { "name": "alice" }, "active": true });
    }

    #[test]
    fn add_to_set_skips_existing_values_and_pull_removes_all() {
        let document = doc! { "_id": 1, "tags": ["a", "b", "a"] };

        let added = apply_update(&document, doc! { "$addToSet": { "tags": "a", "labels": "x" } }).unwrap();
        assert_eq!(added.get_array("tags").unwrap().len(), 3);
        assert_eq!(added.get_array("labels").unwrap(), &vec![Bson::from("x")]);

        let pulled = apply_update(&added, doc! { "$pull": { "tags": "a" } }).unwrap();
        assert_eq!(pulled.get_array("tags").unwrap(), &vec![Bson::from("b")]);
    }

    #[test]
    fn unset_removes_nested_fields() {
        let updated = apply_update(
            &doc! { "_id": 1, "time": { "ended": 5, "started": 1 } },
            doc! { "$unset": { "time.ended": "" } },
        )
        .unwrap();

        assert_eq!(updated, doc! { "_id": 1, "time": { "started": 1 } });
    }

    #[test]
    fn replacement_keeps_the_stored_id() {
        let updated = apply_update(
            &doc! { "_id": 1, "name": "alice" },
            doc! { "_id": 2, "name": "bob" },
        )
        .unwrap();

        assert_eq!(updated, doc! { "_id": 1, "name": "bob" });
    }

    #[test]
    fn unsupported_operators_and_type_clashes_fail() {
        let document = doc! { "_id": 1, "count": 1 };

        assert!(matches!(
            apply_update(&document, doc! { "$inc": { "count": 1 } }),
            Err(DocQueueError::InvalidDocument(_))
        ));
        assert!(matches!(
            apply_update(&document, doc! { "$addToSet": { "count": 2 } }),
            Err(DocQueueError::InvalidDocument(_))
        ));
    }
}
