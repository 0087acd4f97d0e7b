//! Filter, sort and pagination over in-memory records.
//!
//! A [`Query`] runs in a fixed order: every filter (logical AND), then a
//! stable multi-key sort, then offset, then limit.

use std::cmp::Ordering;

use repodb_types::Record;
use serde_json::{Number, Value};

use crate::error::{CollectionError, CollectionResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Membership for array fields, substring for string fields.
    Contains,
    /// The field value is one of the elements of an array operand.
    In,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$contains" => Self::Contains,
            "$in" => Self::In,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Whether `record` passes this filter. Operands of mismatched types
    /// never match.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field);
        match self.op {
            FilterOp::Eq => actual == Some(&self.value),
            FilterOp::Ne => actual != Some(&self.value),
            FilterOp::Gt => ordered(actual, &self.value).is_some_and(Ordering::is_gt),
            FilterOp::Gte => ordered(actual, &self.value).is_some_and(Ordering::is_ge),
            FilterOp::Lt => ordered(actual, &self.value).is_some_and(Ordering::is_lt),
            FilterOp::Lte => ordered(actual, &self.value).is_some_and(Ordering::is_le),
            FilterOp::Contains => match (actual, &self.value) {
                (Some(Value::Array(items)), needle) => items.contains(needle),
                (Some(Value::String(hay)), Value::String(needle)) => hay.contains(needle.as_str()),
                _ => false,
            },
            FilterOp::In => match (actual, &self.value) {
                (Some(v), Value::Array(options)) => options.contains(v),
                _ => false,
            },
        }
    }
}

/// Order of two values of the same scalar kind; `None` otherwise.
fn ordered(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual, operand) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => Some(cmp_numbers(a, b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    sort: Vec<SortKey>,
    offset: usize,
    limit: Option<usize>,
}

impl Query {
    /// Matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build filters from a criteria object.
    ///
    /// `{"role": "admin"}` is equality; `{"age": {"$gte": 18, "$lt": 65}}`
    /// applies each operator.
    pub fn from_criteria(criteria: &Value) -> CollectionResult<Self> {
        let Value::Object(fields) = criteria else {
            return Err(CollectionError::InvalidQuery(
                "criteria must be a JSON object".into(),
            ));
        };
        let mut query = Self::new();
        for (field, condition) in fields {
            match condition {
                Value::Object(ops) if is_operator_object(ops) => {
                    for (op, operand) in ops {
                        let op = FilterOp::parse(op).ok_or_else(|| {
                            CollectionError::InvalidQuery(format!("unknown operator {op} on {field}"))
                        })?;
                        if op == FilterOp::In && !operand.is_array() {
                            return Err(CollectionError::InvalidQuery(format!(
                                "$in on {field} needs an array"
                            )));
                        }
                        query.filters.push(Filter::new(field.clone(), op, operand.clone()));
                    }
                }
                value => query.filters.push(Filter::eq(field.clone(), value.clone())),
            }
        }
        Ok(query)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn asc(self, field: impl Into<String>) -> Self {
        self.sort_by(field, Direction::Asc)
    }

    pub fn desc(self, field: impl Into<String>) -> Self {
        self.sort_by(field, Direction::Desc)
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The single equality filter an index can answer, if that is all the
    /// query filters on.
    pub fn index_probe(&self) -> Option<(&str, &Value)> {
        match self.filters.as_slice() {
            [Filter {
                field,
                op: FilterOp::Eq,
                value,
            }] => Some((field.as_str(), value)),
            _ => None,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Filter, sort and paginate.
    pub fn apply<'a, I>(&self, records: I) -> Vec<&'a Record>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let matched = records.into_iter().filter(|r| self.matches(r)).collect();
        self.arrange(matched)
    }

    /// Sort and paginate records already known to match.
    pub fn arrange<'a>(&self, mut records: Vec<&'a Record>) -> Vec<&'a Record> {
        if !self.sort.is_empty() {
            records.sort_by(|a, b| self.compare(a, b));
        }
        records
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.sort {
            let ord = compare_values(a.get(&key.field), b.get(&key.field));
            let ord = match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn is_operator_object(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_) | Value::Object(_)) => 4,
    }
}

/// Total order used for sorting: missing and null first, then booleans,
/// numbers, strings; arrays and objects last and mutually equal.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => cmp_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        repodb_types::record_from_value(value).unwrap()
    }

    fn people() -> Vec<Record> {
        vec![
            rec(json!({"id": "1", "name": "Alice", "age": 30, "tags": ["admin", "ops"]})),
            rec(json!({"id": "2", "name": "Bob", "age": 25, "tags": ["dev"]})),
            rec(json!({"id": "3", "name": "Carol", "age": 35})),
            rec(json!({"id": "4", "name": "Dave", "age": 25, "tags": ["dev", "ops"]})),
            rec(json!({"id": "5", "name": "Eve", "age": "unknown"})),
        ]
    }

    fn ids(records: &[&Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }

    fn run(query: &Query) -> Vec<String> {
        let data = people();
        ids(&query.apply(data.iter()))
    }

    #[test]
    fn empty_query_returns_everything_in_order() {
        assert_eq!(run(&Query::new()), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn equality_and_inequality() {
        assert_eq!(run(&Query::new().where_eq("age", 25)), vec!["2", "4"]);
        assert_eq!(
            run(&Query::new().filter(Filter::new("age", FilterOp::Ne, 25))),
            vec!["1", "3", "5"]
        );
    }

    #[test]
    fn range_operators_fail_closed_on_type_mismatch() {
        let q = Query::from_criteria(&json!({"age": {"$gte": 25, "$lt": 35}})).unwrap();
        // "unknown" is a string and never compares with a number.
        assert_eq!(run(&q), vec!["1", "2", "4"]);
        let q = Query::from_criteria(&json!({"age": {"$gt": "a"}})).unwrap();
        assert_eq!(run(&q), vec!["5"]);
    }

    #[test]
    fn contains_tests_membership_and_substring() {
        let q = Query::from_criteria(&json!({"tags": {"$contains": "ops"}})).unwrap();
        assert_eq!(run(&q), vec!["1", "4"]);
        let q = Query::from_criteria(&json!({"name": {"$contains": "ar"}})).unwrap();
        assert_eq!(run(&q), vec!["3"]);
        // Numbers are neither arrays nor strings.
        let q = Query::from_criteria(&json!({"age": {"$contains": 3}})).unwrap();
        assert!(run(&q).is_empty());
    }

    #[test]
    fn in_operator() {
        let q = Query::from_criteria(&json!({"name": {"$in": ["Bob", "Eve", "Zed"]}})).unwrap();
        assert_eq!(run(&q), vec!["2", "5"]);
        assert!(Query::from_criteria(&json!({"name": {"$in": "Bob"}})).is_err());
    }

    #[test]
    fn criteria_validation() {
        assert!(Query::from_criteria(&json!([1])).is_err());
        assert!(Query::from_criteria(&json!({"a": {"$regex": "x"}})).is_err());
        // Plain nested objects are equality operands.
        let q = Query::from_criteria(&json!({"meta": {"k": 1}})).unwrap();
        assert_eq!(q.index_probe(), Some(("meta", &json!({"k": 1}))));
    }

    #[test]
    fn multi_key_sort_is_stable() {
        let q = Query::new().asc("age").desc("name");
        // Strings sort after numbers.
        assert_eq!(run(&q), vec!["4", "2", "1", "3", "5"]);
        let q = Query::new().desc("age");
        assert_eq!(run(&q), vec!["5", "3", "1", "2", "4"]);
    }

    #[test]
    fn missing_fields_sort_first() {
        let q = Query::new().asc("tags");
        assert_eq!(run(&q)[..2], ["3".to_string(), "5".to_string()]);
    }

    #[test]
    fn pagination_runs_after_sort() {
        let q = Query::new().asc("name").offset(1).limit(2);
        assert_eq!(run(&q), vec!["2", "3"]);
        assert!(run(&Query::new().offset(10)).is_empty());
        assert!(run(&Query::new().limit(0)).is_empty());
    }

    #[test]
    fn index_probe_requires_single_equality() {
        assert!(Query::new().index_probe().is_none());
        assert!(Query::new().where_eq("a", 1).where_eq("b", 2).index_probe().is_none());
        assert!(Query::new()
            .filter(Filter::new("a", FilterOp::Gt, 1))
            .index_probe()
            .is_none());
        assert_eq!(
            Query::new().where_eq("id", "7").limit(1).index_probe(),
            Some(("id", &json!("7")))
        );
    }

    #[test]
    fn numeric_ordering_mixes_ints_and_floats() {
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(2.5))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(-1)), Some(&json!(u64::MAX))),
            Ordering::Less
        );
        assert_eq!(compare_values(None, Some(&Value::Null)), Ordering::Equal);
        assert_eq!(
            compare_values(Some(&json!([1])), Some(&json!({"a": 1}))),
            Ordering::Equal
        );
    }
}
