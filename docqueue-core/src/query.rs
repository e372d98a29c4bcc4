//! Filter expressions and read options for queued operations.
//!
//! Reads, counts and filtered updates all take a [`Query`]. A bare [`Expr`] converts into a
//! query with no sort or paging, and [`Query::new`] matches every document. Backends
//! interpret the AST through [`QueryVisitor`]: the memory backend evaluates it directly,
//! the MongoDB backend translates it into a filter document.
//!
//! ```ignore
//! use docqueue::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("status", "active").and(Filter::gt("age", 18)))
//!     .sort("created", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Filters
//!
//! [`Filter`] builds every expression the backends understand:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Text: `starts_with`, `ends_with`, `contains`, `not_contains`, `regex`
//! - Presence: `exists`, `not_exists`
//! - Membership: `any_of`, `none_of`
//! - Logic: `and`, `or`, plus [`Expr::and`], [`Expr::or`] and [`Expr::not`] for chaining
//!
//! Filters always see the stored document, before any migration runs.

use bson::Bson;

use crate::error::DocQueueError;

/// Sort direction for query results.
#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    /// Smallest first. Documents missing the field come first.
    Asc,
    /// Largest first. Documents missing the field come last.
    Desc,
}

/// Field and direction to sort results by.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// Dotted path of the sort key.
    pub field: String,
    pub direction: SortDirection,
}

/// Field comparison operators.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal, with integers and doubles compared as numbers.
    Eq,
    /// Not equal. Also matches documents missing the field.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// String contains substring, or array contains element.
    Contains,
    /// Negation of [`Contains`](FieldOp::Contains). Matches a missing field.
    NotContains,
    /// String starts with the given text, taken literally.
    StartsWith,
    /// String ends with the given text, taken literally.
    EndsWith,
    /// Field value (or any of its elements) is one of the given values.
    AnyOf,
    /// Field value (and every element) is none of the given values. Matches a missing
    /// field.
    NoneOf,
    /// String matches a regular expression.
    Regex,
}

/// A filter expression. Field names may be dotted paths into nested documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Every expression matches.
    And(Vec<Expr>),
    /// At least one expression matches.
    Or(Vec<Expr>),
    /// The inner expression does not match.
    Not(Box<Expr>),
    /// The field is present (`true`) or absent (`false`).
    Exists(String, bool),
    /// Compares the value at `field` with `value`.
    Field {
        field: String,
        op: FieldOp,
        /// An array for [`FieldOp::AnyOf`] and [`FieldOp::NoneOf`]; a scalar is treated as
        /// a one-element list.
        value: Bson,
    },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines with another expression using AND, flattening an existing AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines with another expression using OR, flattening an existing OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Filter plus read options.
///
/// `limit` only applies to [`find`](crate::queue::DbQueue::find); counts ignore paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// `None` matches every document.
    pub filter: Option<Expr>,
    /// Maximum number of documents returned.
    pub limit: Option<usize>,
    /// Number of matching documents skipped before the first one returned.
    pub offset: Option<usize>,
    pub sort: Option<Sort>,
}

impl Query {
    /// A query matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query {
            filter: Some(filter),
            ..Query::default()
        }
    }
}

impl From<Option<Expr>> for Query {
    fn from(filter: Option<Expr>) -> Self {
        Query {
            filter,
            ..Query::default()
        }
    }
}

/// Constructors for filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches string fields against a regular expression.
    ///
    /// The pattern syntax is the backend's: PCRE for MongoDB, the `regex` crate for the
    /// memory backend. Plain patterns behave the same on both.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Regex, Bson::String(pattern.into()))
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort = Some(Sort { field: field.into(), direction });
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks a filter expression. Implemented once per backend.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocQueueError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_existing_conjunction() {
        let expr = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));

        match expr {
            Expr::And(list) => assert_eq!(list.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn expr_converts_into_unpaged_query() {
        let query: Query = Filter::regex("name", "^al").into();

        assert_eq!(
            query.filter,
            Some(Expr::field("name".into(), FieldOp::Regex, Bson::String("^al".into())))
        );
        assert!(query.limit.is_none() && query.offset.is_none() && query.sort.is_none());
    }
}
