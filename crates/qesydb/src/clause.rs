//! SQL fragment compilation.
//!
//! Every function here appends its values to the [`Binder`] it is given, so a
//! statement built from several fragments keeps one consecutive `$N` sequence.
//! Fragments that can be absent return either an empty string or a string with
//! a leading space, ready to be concatenated.

use crate::binder::Binder;
use crate::condition::Condition;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use std::collections::HashSet;

/// `LIMIT count OFFSET offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

impl Limit {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }
}

/// Quote a column name for INSERT/UPDATE column lists.
///
/// Already-quoted names are kept as they are; embedded quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        return name.to_string();
    }
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// ` WHERE ...`, or `""` when the condition is empty.
pub fn where_clause(condition: &Condition, binder: &mut Binder) -> String {
    match condition.build(binder) {
        Some(sql) => format!(" WHERE {sql}"),
        None => String::new(),
    }
}

/// `("a", "b") VALUES ($1, $2)` for a single row.
pub fn insert_clause(record: &Record, binder: &mut Binder) -> OrmResult<String> {
    if record.is_empty() {
        return Err(OrmError::validation("insert requires at least one column"));
    }
    let columns: Vec<String> = record.columns().map(quote_ident).collect();
    let values = binder.bind_list(record.iter().map(|(_, v)| v.clone()));
    Ok(format!("({}) VALUES ({values})", columns.join(", ")))
}

/// `("a", "b") VALUES ($1, $2), ($3, $4)` for many rows.
///
/// The first row's columns fix the column list and order. Every other row
/// must have exactly the same set of columns.
pub fn batch_insert_clause(rows: &[Record], binder: &mut Binder) -> OrmResult<String> {
    let first = rows
        .first()
        .ok_or_else(|| OrmError::validation("batch insert requires at least one row"))?;
    if first.is_empty() {
        return Err(OrmError::validation("batch insert rows must have at least one column"));
    }

    let columns: Vec<&str> = first.columns().collect();
    let expected: HashSet<&str> = columns.iter().copied().collect();

    let mut tuples = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        if let Some(extra) = row.columns().find(|c| !expected.contains(c)) {
            return Err(OrmError::validation(format!(
                "batch insert row {idx} has column '{extra}' not present in row 0"
            )));
        }
        let mut values = Vec::with_capacity(columns.len());
        for column in &columns {
            let value = row.get(column).ok_or_else(|| {
                OrmError::validation(format!(
                    "batch insert row {idx} is missing column '{column}'"
                ))
            })?;
            values.push(binder.bind(value.clone()));
        }
        tuples.push(format!("({})", values.join(", ")));
    }

    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    Ok(format!("({}) VALUES {}", quoted.join(", "), tuples.join(", ")))
}

/// `"a"=$1, "b"=$2`
pub fn update_clause(record: &Record, binder: &mut Binder) -> OrmResult<String> {
    if record.is_empty() {
        return Err(OrmError::validation("update requires at least one column to set"));
    }
    let sets: Vec<String> = record
        .iter()
        .map(|(column, value)| format!("{}={}", quote_ident(column), binder.bind(value.clone())))
        .collect();
    Ok(sets.join(", "))
}

/// ` LIMIT n` / ` LIMIT n OFFSET m`, or `""`.
pub fn limit_clause(limit: Option<Limit>) -> String {
    match limit {
        None => String::new(),
        Some(Limit { offset: 0, count }) => format!(" LIMIT {count}"),
        Some(Limit { offset, count }) => format!(" LIMIT {count} OFFSET {offset}"),
    }
}

/// ` ORDER BY ...`, or `""`.
pub fn order_by_clause(sort: &str) -> String {
    passthrough(" ORDER BY ", sort)
}

/// ` GROUP BY ...`, or `""`.
pub fn group_by_clause(group_by: &str) -> String {
    passthrough(" GROUP BY ", group_by)
}

/// Field list for SELECT; `*` when empty.
pub fn field_list(fields: &str) -> &str {
    match fields.trim() {
        "" => "*",
        f => f,
    }
}

fn passthrough(keyword: &str, fragment: &str) -> String {
    match fragment.trim() {
        "" => String::new(),
        f => format!("{keyword}{f}"),
    }
}
