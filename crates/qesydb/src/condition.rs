//! WHERE conditions.
//!
//! A [`Condition`] is an AND-list of [`Filter`]s. Filters are built explicitly
//! (`Filter::eq`, `Filter::in_list`, `Filter::raw`, ...) or converted from the
//! map shapes callers commonly hold:
//!
//! - [`Condition::from_map`]: flat `column → value` equality map
//! - [`Condition::from_typed`]: `column → value | [values]` map with IN-lists
//!
//! Map keys may carry their own operator (`"age >"`, `"name LIKE"`); see
//! [`Op::infer`].
//!
//! Column names and raw fragments are interpolated verbatim. Never pass
//! untrusted input as a column name or raw fragment.

use crate::binder::Binder;
use crate::value::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    NotLike,
    NotIlike,
    /// The operator is already part of the column text (e.g. `"age >="`).
    Embedded,
}

impl Op {
    /// Operator implied by a map key.
    ///
    /// Keys containing `LIKE`, `>` or `<` carry their own operator; everything
    /// else is an equality test.
    pub fn infer(key: &str) -> Op {
        if key.contains("LIKE") || key.contains('>') || key.contains('<') {
            Op::Embedded
        } else {
            Op::Eq
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::Ilike => "ILIKE",
            Op::NotLike => "NOT LIKE",
            Op::NotIlike => "NOT ILIKE",
            Op::Embedded => "",
        }
    }
}

/// A single WHERE predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Raw SQL fragment, emitted verbatim with nothing bound.
    Raw(String),
    /// `column <op> $n`
    Compare { column: String, op: Op, value: Value },
    /// `column in ($a, $b, ...)` (or `not in`)
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column IS NULL` (or `IS NOT NULL`)
    Null { column: String, negated: bool },
}

impl Filter {
    pub fn raw(sql: impl Into<String>) -> Self {
        Filter::Raw(sql.into())
    }

    pub fn compare(column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Gte, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Op::Lte, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::compare(column, Op::Like, pattern)
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::compare(column, Op::Ilike, pattern)
    }

    pub fn in_list<I>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<I>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::Null {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::Null {
            column: column.into(),
            negated: true,
        }
    }

    /// Render the predicate, binding its values. `None` for an empty raw fragment.
    pub fn build(&self, binder: &mut Binder) -> Option<String> {
        let sql = match self {
            Filter::Raw(sql) if sql.trim().is_empty() => return None,
            Filter::Raw(sql) => sql.clone(),
            Filter::Compare { column, op, value } => {
                let ph = binder.bind(value.clone());
                match op {
                    Op::Eq => format!("{column}={ph}"),
                    Op::Embedded => format!("{column} {ph}"),
                    _ => format!("{column} {} {ph}", op.as_sql()),
                }
            }
            // Empty list: IN matches nothing, NOT IN matches everything.
            Filter::In { values, negated, .. } if values.is_empty() => {
                let always = if *negated { "1=1" } else { "1=0" };
                always.to_string()
            }
            Filter::In {
                column,
                values,
                negated,
            } => {
                let list = binder.bind_list(values.iter().cloned());
                let op = if *negated { "not in" } else { "in" };
                format!("{column} {op} ({list})")
            }
            Filter::Null { column, negated } => {
                let op = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{column} {op}")
            }
        };
        Some(sql)
    }
}

/// Right-hand side of a typed condition map entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CondValue {
    One(Value),
    Many(Vec<Value>),
}

impl From<Value> for CondValue {
    fn from(v: Value) -> Self {
        CondValue::One(v)
    }
}

impl From<Vec<Value>> for CondValue {
    fn from(v: Vec<Value>) -> Self {
        CondValue::Many(v)
    }
}

macro_rules! impl_cond_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for CondValue {
                fn from(v: $t) -> Self {
                    CondValue::One(v.into())
                }
            }

            impl From<Vec<$t>> for CondValue {
                fn from(v: Vec<$t>) -> Self {
                    CondValue::Many(v.into_iter().map(Into::into).collect())
                }
            }
        )*
    };
}

impl_cond_value!(&str, String, i32, i64, f64, bool);

impl From<&[&str]> for CondValue {
    fn from(v: &[&str]) -> Self {
        CondValue::Many(v.iter().copied().map(Into::into).collect())
    }
}

/// An AND-list of filters. Empty means "no WHERE clause".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    filters: Vec<Filter>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// A caller-written fragment, emitted as `WHERE <sql>` with nothing bound.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            filters: vec![Filter::Raw(sql.into())],
        }
    }

    /// Flat equality map; operators are inferred from the keys.
    ///
    /// Fragments follow the iterator's order: pass a `BTreeMap` or a `Vec` of
    /// pairs for stable SQL text, a `HashMap` only guarantees the same set of
    /// predicates.
    pub fn from_map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let filters = entries
            .into_iter()
            .map(|(k, v)| {
                let column = k.into();
                let op = Op::infer(&column);
                Filter::compare(column, op, v)
            })
            .collect();
        Self { filters }
    }

    /// Map whose values are single values or lists.
    ///
    /// Lists become `column in (...)`. An empty list binds one empty string
    /// and compares with `=`, so `{"id": []}` matches rows whose `id` is `''`.
    pub fn from_typed<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CondValue>,
    {
        let filters = entries
            .into_iter()
            .map(|(k, v)| {
                let column = k.into();
                match v.into() {
                    CondValue::One(value) => {
                        let op = Op::infer(&column);
                        Filter::compare(column, op, value)
                    }
                    CondValue::Many(values) if values.is_empty() => {
                        Filter::compare(column, Op::Eq, Value::text(""))
                    }
                    CondValue::Many(values) => Filter::In {
                        column,
                        values,
                        negated: false,
                    },
                }
            })
            .collect();
        Self { filters }
    }

    /// Add a filter (AND).
    pub fn and(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.iter().all(|f| matches!(f, Filter::Raw(s) if s.trim().is_empty()))
    }

    /// Render the predicates joined by ` AND `, without the `WHERE` keyword.
    ///
    /// A lone raw fragment is emitted verbatim; raw fragments combined with
    /// other filters are parenthesized.
    pub fn build(&self, binder: &mut Binder) -> Option<String> {
        let parts: Vec<(bool, String)> = self
            .filters
            .iter()
            .filter_map(|f| f.build(binder).map(|sql| (matches!(f, Filter::Raw(_)), sql)))
            .collect();

        match parts.len() {
            0 => None,
            1 => parts.into_iter().next().map(|(_, sql)| sql),
            _ => Some(
                parts
                    .into_iter()
                    .map(|(raw, sql)| if raw { format!("({sql})") } else { sql })
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        }
    }
}

impl From<Filter> for Condition {
    fn from(filter: Filter) -> Self {
        Self {
            filters: vec![filter],
        }
    }
}

impl From<Vec<Filter>> for Condition {
    fn from(filters: Vec<Filter>) -> Self {
        Self { filters }
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::raw(sql)
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::raw(sql)
    }
}
