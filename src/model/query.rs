//! Structured queries
//!
//! A `Query` is a list of field conditions plus optional ordering and
//! paging. Drivers evaluate it; the helpers here give the reference
//! semantics used by the in-memory driver.

use crate::error::{DbxError, Result};
use crate::model::schema::ModelSchema;
use crate::model::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a condition
///
/// Values of different kinds never satisfy a comparison, `Ne` included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Value is one of an array of candidates
    In,
    /// Substring for strings, membership for arrays
    Contains,
}

/// A single `field <op> value` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    /// Whether a row satisfies this condition
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);

        match self.op {
            Op::Eq => actual == &self.value || compare_values(actual, &self.value) == Some(Ordering::Equal),
            Op::Ne => {
                kind_rank(actual) == kind_rank(&self.value)
                    && actual != &self.value
                    && compare_values(actual, &self.value) != Some(Ordering::Equal)
            }
            Op::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            Op::Le => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Op::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            Op::Ge => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Op::In => match &self.value {
                Value::Array(candidates) => candidates
                    .iter()
                    .any(|c| c == actual || compare_values(actual, c) == Some(Ordering::Equal)),
                _ => false,
            },
            Op::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A structured query against one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl Query {
    /// Create a query matching every row
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition
    pub fn filter(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality condition
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Op::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Names of all fields the query refers to
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .map(|c| c.field.as_str())
            .chain(self.order.iter().map(|o| o.field.as_str()))
    }

    /// Check that every referenced field exists in the schema
    pub fn validate(&self, schema: &ModelSchema) -> Result<()> {
        match self.fields().find(|f| !schema.has_field(f)) {
            Some(field) => Err(DbxError::unknown_field(schema.name(), field)),
            None => Ok(()),
        }
    }

    /// Whether a row satisfies all conditions
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Filter, order and page a set of rows
    pub fn apply<I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut matched: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(ref order) = self.order {
            matched.sort_by(|a, b| {
                let left = a.get(&order.field).unwrap_or(&Value::Null);
                let right = b.get(&order.field).unwrap_or(&Value::Null);
                let ordering = sort_key_cmp(left, right);
                match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).collect()
    }

    /// Stable string form used as a cache key
    pub fn cache_key(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Compare two values of the same kind
///
/// Returns `None` when the kinds differ or are not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order for sorting: by kind first, then by value
fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    compare_values(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{FieldType, ModelField};
    use serde_json::json;

    fn row(name: &str, age: i64) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), json!(name));
        row.insert("age".to_string(), json!(age));
        row.insert("tags".to_string(), json!(["a", name]));
        row
    }

    fn rows() -> Vec<Row> {
        vec![row("cat", 3), row("ant", 10), row("bee", 7), row("dog", 10)]
    }

    #[test]
    fn test_comparisons() {
        let r = row("cat", 3);
        assert!(Query::new().eq("age", 3).matches(&r));
        assert!(Query::new().eq("age", 3.0).matches(&r));
        assert!(Query::new().filter("age", Op::Ne, 4).matches(&r));
        assert!(Query::new().filter("age", Op::Lt, 4).matches(&r));
        assert!(Query::new().filter("age", Op::Le, 3).matches(&r));
        assert!(!Query::new().filter("age", Op::Gt, 3).matches(&r));
        assert!(Query::new().filter("name", Op::Ge, "bat").matches(&r));
        assert!(!Query::new().filter("age", Op::Lt, "4").matches(&r));
    }

    #[test]
    fn test_ne_requires_same_kind() {
        let r = row("cat", 3);
        assert!(!Query::new().filter("age", Op::Ne, "4").matches(&r));
        assert!(!Query::new().filter("age", Op::Ne, 3.0).matches(&r));
        assert!(!Query::new().filter("email", Op::Ne, "x").matches(&r));
        assert!(Query::new().filter("tags", Op::Ne, json!(["a"])).matches(&r));
    }

    #[test]
    fn test_in_and_contains() {
        let r = row("cat", 3);
        assert!(Query::new().filter("age", Op::In, json!([1, 3])).matches(&r));
        assert!(!Query::new().filter("age", Op::In, 3).matches(&r));
        assert!(Query::new().filter("name", Op::Contains, "at").matches(&r));
        assert!(Query::new().filter("tags", Op::Contains, "cat").matches(&r));
        assert!(!Query::new().filter("age", Op::Contains, 3).matches(&r));
    }

    #[test]
    fn test_apply_order_and_paging() {
        let result = Query::new()
            .filter("age", Op::Ge, 5)
            .order_by("name", Direction::Desc)
            .apply(rows());
        let names: Vec<_> = result.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["dog", "bee", "ant"]);

        let paged = Query::new()
            .order_by("name", Direction::Asc)
            .offset(1)
            .limit(2)
            .apply(rows());
        let names: Vec<_> = paged.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["bee", "cat"]);
    }

    #[test]
    fn test_sort_mixed_kinds() {
        assert_eq!(sort_key_cmp(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(sort_key_cmp(&json!("a"), &json!(1)), Ordering::Greater);
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = ModelSchema::new("user", vec![ModelField::new("name", FieldType::String)]).unwrap();
        assert!(Query::new().eq("name", "x").order_by("id", Direction::Asc).validate(&schema).is_ok());
        assert!(matches!(
            Query::new().order_by("email", Direction::Asc).validate(&schema),
            Err(DbxError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = Query::new().eq("name", "x").limit(5);
        let b = Query::new().eq("name", "x").limit(5);
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
        assert_ne!(a.cache_key().unwrap(), Query::new().cache_key().unwrap());
    }
}
