//! Translation from filter expressions to MongoDB filter documents.

use bson::{Bson, Document, doc};

use docqueue_core::{
    error::DocQueueError,
    query::{Expr, FieldOp, Query, QueryVisitor, SortDirection},
};

/// Translates [`Expr`] trees into MongoDB's native filter syntax.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The filter document for a query; an absent filter matches everything.
    pub fn filter(query: &Query) -> Result<Document, DocQueueError> {
        match &query.filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    pub fn sort(query: &Query) -> Option<Document> {
        query.sort.as_ref().map(|sort| {
            doc! {
                sort.field.clone(): match sort.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                }
            }
        })
    }
}

fn string_operand<'a>(op: &str, value: &'a Bson) -> Result<&'a str, DocQueueError> {
    match value {
        Bson::String(value) => Ok(value),
        other => Err(DocQueueError::InvalidDocument(format!(
            "{op} requires a string value, got {other}"
        ))),
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocQueueError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    // `$not` only applies to field operators, so whole expressions are negated with `$nor`.
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": regex::escape(s) },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": regex::escape(s) } },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => {
                    doc! { "$regex": format!("^{}", regex::escape(string_operand("starts_with", value)?)) }
                }
                FieldOp::EndsWith => {
                    doc! { "$regex": format!("{}$", regex::escape(string_operand("ends_with", value)?)) }
                }
                FieldOp::AnyOf => match value {
                    Bson::Array(_) => doc! { "$in": value },
                    other => doc! { "$in": [other] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(_) => doc! { "$nin": value },
                    other => doc! { "$nin": [other] },
                },
                FieldOp::Regex => doc! { "$regex": string_operand("regex", value)? },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqueue_core::query::Filter;

    fn translate(expr: Expr) -> Document {
        MongoQueryTranslator.visit_expr(&expr).unwrap()
    }

    #[test]
    fn comparisons_and_conjunctions() {
        assert_eq!(
            translate(Filter::eq("status", "active").and(Filter::gt("profile.age", 18))),
            doc! { "$and": [
                { "status": { "$eq": "active" } },
                { "profile.age": { "$gt": 18 } },
            ] }
        );
    }

    #[test]
    fn string_operators_escape_literal_text() {
        assert_eq!(
            translate(Filter::starts_with("name", "a.b")),
            doc! { "name": { "$regex": "^a\\.b" } }
        );
        assert_eq!(
            translate(Filter::regex("name", "^a.b")),
            doc! { "name": { "$regex": "^a.b" } }
        );
    }

    #[test]
    fn negation_uses_nor() {
        assert_eq!(
            translate(Filter::exists("deleted").not()),
            doc! { "$nor": [{ "deleted": { "$exists": true } }] }
        );
    }

    #[test]
    fn non_string_regex_is_rejected() {
        assert!(matches!(
            MongoQueryTranslator.visit_expr(&Expr::field("n".into(), FieldOp::Regex, Bson::Int32(1))),
            Err(DocQueueError::InvalidDocument(_))
        ));
    }

    #[test]
    fn empty_query_matches_everything() {
        let query = Query::builder().sort("created", SortDirection::Desc).build();

        assert_eq!(MongoQueryTranslator::filter(&query).unwrap(), Document::new());
        assert_eq!(MongoQueryTranslator::sort(&query), Some(doc! { "created": -1 }));
    }
}
