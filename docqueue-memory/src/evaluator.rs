//! Filter evaluation for in-memory documents.
//!
//! Field names are dotted paths (`profile.name`). A path that crosses a non-document
//! value resolves to nothing, and a field that resolves to nothing matches no comparison.

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::Regex;
use std::{cmp::Ordering, collections::HashMap};

use docqueue_core::{
    error::{DocQueueError, DocQueueResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Resolves a dotted path inside a document.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Comparable view of a BSON value. Integers compare exactly with each other and are
/// widened to `f64` only against a double.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Anything else compares by raw equality only.
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Integer(i64::from(*value)),
            Bson::Int64(value) => Comparable::Integer(*value),
            Bson::Double(value) => Comparable::Double(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(array) => Comparable::Array(array.iter().map(Comparable::from).collect()),
            Bson::Document(document) => Comparable::Map(
                document
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Integer(a), Comparable::Integer(b)) => a == b,
            (Comparable::Double(a), Comparable::Double(b)) => a == b,
            (Comparable::Integer(a), Comparable::Double(b)) => (*a as f64) == *b,
            (Comparable::Double(a), Comparable::Integer(b)) => *a == (*b as f64),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Integer(a), Comparable::Integer(b)) => a.partial_cmp(b),
            (Comparable::Double(a), Comparable::Double(b)) => a.partial_cmp(b),
            (Comparable::Integer(a), Comparable::Double(b)) => (*a as f64).partial_cmp(b),
            (Comparable::Double(a), Comparable::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// BSON equality with numeric widening, used by filters and by `$addToSet`/`$pull`.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Orders two optional sort keys; missing values sort first.
pub(crate) fn compare_keys(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocQueueResult<bool> {
        self.visit_expr(expr)
    }

    /// Returns true if `document` satisfies the optional filter.
    pub fn matches(document: &Document, filter: Option<&Expr>) -> DocQueueResult<bool> {
        match filter {
            Some(expr) => DocumentEvaluator::new(document).evaluate(expr),
            None => Ok(true),
        }
    }
}

fn any_of(field_value: Comparable<'_>, value: Comparable<'_>) -> bool {
    match (field_value, value) {
        (Comparable::Array(array), Comparable::Array(values)) => {
            values.iter().any(|val| array.contains(val))
        }
        (Comparable::Array(array), single) => array.contains(&single),
        (single, Comparable::Array(values)) => values.contains(&single),
        _ => false,
    }
}

fn contains(field_value: Comparable<'_>, value: Comparable<'_>) -> bool {
    match (field_value, value) {
        (Comparable::Array(array), value) => array.contains(&value),
        (Comparable::String(left), Comparable::String(right)) => left.contains(right),
        _ => false,
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocQueueError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup(self.document, field) else {
            return Ok(matches!(op, FieldOp::Ne | FieldOp::NotContains | FieldOp::NoneOf));
        };
        let (left, right) = (Comparable::from(field_value), Comparable::from(value));

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt => left.partial_cmp(&right) == Some(Ordering::Greater),
            FieldOp::Gte => matches!(left.partial_cmp(&right), Some(Ordering::Greater | Ordering::Equal)),
            FieldOp::Lt => left.partial_cmp(&right) == Some(Ordering::Less),
            FieldOp::Lte => matches!(left.partial_cmp(&right), Some(Ordering::Less | Ordering::Equal)),
            FieldOp::Contains => contains(left, right),
            FieldOp::NotContains => !contains(left, right),
            FieldOp::StartsWith => match (left, right) {
                (Comparable::String(left), Comparable::String(right)) => left.starts_with(right),
                _ => false,
            },
            FieldOp::EndsWith => match (left, right) {
                (Comparable::String(left), Comparable::String(right)) => left.ends_with(right),
                _ => false,
            },
            FieldOp::AnyOf => any_of(left, right),
            FieldOp::NoneOf => !any_of(left, right),
            FieldOp::Regex => {
                let Comparable::String(pattern) = right else {
                    return Err(DocQueueError::InvalidDocument(format!(
                        "regex filter on {field} needs a string pattern"
                    )));
                };
                let regex = Regex::new(pattern).map_err(|err| {
                    DocQueueError::InvalidDocument(format!("invalid regex for {field}: {err}"))
                })?;

                matches!(left, Comparable::String(text) if regex.is_match(text))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docqueue_core::query::Filter;

    fn matches(document: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let document = doc! { "profile": { "name": "alice", "age": 30 }, "tags": ["a", "b"] };

        assert!(matches(&document, Filter::eq("profile.name", "alice")));
        assert!(matches(&document, Filter::gte("profile.age", 30i64)));
        assert!(!matches(&document, Filter::exists("profile.name.first")));
        assert!(matches(&document, Filter::contains("tags", "b")));
    }

    #[test]
    fn missing_fields_only_satisfy_negative_operators() {
        let document = doc! { "name": "alice" };

        assert!(!matches(&document, Filter::eq("age", 1)));
        assert!(matches(&document, Filter::ne("age", 1)));
        assert!(matches(&document, Filter::none_of("role", vec!["admin"])));
    }

    #[test]
    fn regex_matches_strings_and_rejects_bad_patterns() {
        let document = doc! { "name": "alice" };

        assert!(matches(&document, Filter::regex("name", "^al")));
        assert!(!matches(&document, Filter::regex("name", "^bo")));
        assert!(matches!(
            DocumentEvaluator::new(&document).evaluate(&Filter::regex("name", "(")),
            Err(DocQueueError::InvalidDocument(_))
        ));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let (first, second) = (ObjectId::new(), ObjectId::new());
        let document = doc! { "_id": first };

        assert!(matches(&document, Filter::eq("_id", first)));
        assert!(!matches(&document, Filter::eq("_id", second)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let (low, high) = (Bson::Int64(9_007_199_254_740_992), Bson::Int64(9_007_199_254_740_993));

        assert!(!values_equal(&low, &high));
        assert_eq!(compare_keys(Some(&low), Some(&high)), Ordering::Less);
        assert!(values_equal(&Bson::Int32(3), &Bson::Int64(3)));
        assert!(values_equal(&Bson::Int64(3), &Bson::Double(3.0)));
    }

    #[test]
    fn missing_sort_keys_come_first() {
        let value = Bson::Int32(1);

        assert_eq!(compare_keys(None, Some(&value)), Ordering::Less);
        assert_eq!(compare_keys(Some(&value), Some(&Bson::Double(1.0))), Ordering::Equal);
    }
}
