//! Placeholder numbering and bound-value storage.

use crate::value::Value;
use tokio_postgres::types::ToSql;

/// Hands out `$N` placeholders and keeps the values bound to them.
///
/// The cursor is derived from the number of bound values, so the Nth
/// placeholder handed out always refers to the Nth value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Binder {
    values: Vec<Value>,
}

impl Binder {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Ordinal the next bound value will receive (starts at 1).
    pub fn cursor(&self) -> usize {
        self.values.len() + 1
    }

    /// Text of the placeholder the next bound value will receive.
    pub fn next_placeholder(&self) -> String {
        format!("${}", self.cursor())
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        let placeholder = self.next_placeholder();
        self.values.push(value.into());
        placeholder
    }

    /// Bind every value in order, returning `"$a, $b, ..."`.
    pub fn bind_list<I>(&mut self, values: I) -> String
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        values
            .into_iter()
            .map(|v| self.bind(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A compiled statement: SQL text plus the values for its placeholders.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Plan {
    pub fn new(sql: impl Into<String>, binder: Binder) -> Self {
        Self {
            sql: sql.into(),
            params: binder.into_values(),
        }
    }

    /// Parameters as references for tokio-postgres.
    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}
