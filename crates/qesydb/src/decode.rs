//! Decoding rows into `column → String` maps.
//!
//! Every column is classified by the type the server reports for it
//! ([`ColumnKind::of`]), read with the matching Rust type, and rendered as its
//! canonical text ([`Cell::into_text`]). `NULL` becomes `""`, so a decoded row
//! cannot tell `NULL` apart from an empty string.

use crate::error::{OrmError, OrmResult};
use crate::value::{TIME_FORMAT, TIMESTAMP_FORMAT};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use std::collections::HashMap;
use std::error::Error;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Kind, Type};

/// One decoded row.
pub type RowResult = HashMap<String, String>;

/// Decoding category of a column, chosen from its reported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Unsigned,
    Float,
    Boolean,
    Text,
    Binary,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Uuid,
    Json,
    Numeric,
    /// Enums and domains over text: the binary form is the UTF-8 label.
    Label,
    /// No decoder; non-null values are a decode error.
    Other,
}

impl ColumnKind {
    pub fn of(ty: &Type) -> Self {
        match *ty {
            Type::INT2 | Type::INT4 | Type::INT8 => ColumnKind::Integer,
            Type::OID => ColumnKind::Unsigned,
            Type::FLOAT4 | Type::FLOAT8 => ColumnKind::Float,
            Type::BOOL => ColumnKind::Boolean,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                ColumnKind::Text
            }
            Type::BYTEA => ColumnKind::Binary,
            Type::TIMESTAMP => ColumnKind::Timestamp,
            Type::TIMESTAMPTZ => ColumnKind::TimestampTz,
            Type::DATE => ColumnKind::Date,
            Type::TIME => ColumnKind::Time,
            Type::UUID => ColumnKind::Uuid,
            Type::JSON | Type::JSONB => ColumnKind::Json,
            Type::NUMERIC => ColumnKind::Numeric,
            _ => match ty.kind() {
                Kind::Enum(_) => ColumnKind::Label,
                Kind::Domain(inner)
                    if matches!(ColumnKind::of(inner), ColumnKind::Text | ColumnKind::Label) =>
                {
                    ColumnKind::Label
                }
                // citext, ltree and friends
                _ if <String as FromSql<'_>>::accepts(ty) => ColumnKind::Text,
                _ => ColumnKind::Other,
            },
        }
    }
}

/// A typed column value, before canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Real(f32),
    Boolean(bool),
    Text(String),
    Binary(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
}

impl Cell {
    /// Canonical text of the value.
    ///
    /// Floats use the shortest text that parses back to the same value,
    /// booleans are `"1"`/`"0"`, timestamps use [`TIMESTAMP_FORMAT`].
    pub fn into_text(self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Integer(v) => v.to_string(),
            Cell::Unsigned(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Real(v) => v.to_string(),
            Cell::Boolean(true) => "1".to_string(),
            Cell::Boolean(false) => "0".to_string(),
            Cell::Text(s) => s,
            Cell::Binary(b) => match String::from_utf8(b) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
            Cell::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Borrows a column's wire bytes without interpreting them.
struct RawBytes<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawBytes<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawBytes(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Turns driver rows into [`RowResult`]s.
#[derive(Debug, Clone, Copy)]
pub struct ResultDecoder {
    offset: FixedOffset,
}

impl Default for ResultDecoder {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

impl ResultDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `timestamptz` columns in this offset instead of UTC.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Decode every row, stopping at the first failure.
    ///
    /// On failure the error is an [`OrmError::PartialResult`] carrying the
    /// rows decoded before the failing one.
    pub fn decode_rows(&self, rows: &[Row]) -> OrmResult<Vec<RowResult>> {
        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            match self.decode_row(row) {
                Ok(r) => decoded.push(r),
                Err(e) => return Err(OrmError::partial(decoded, e)),
            }
        }
        Ok(decoded)
    }

    /// Decode one row into `column → canonical text`.
    pub fn decode_row(&self, row: &Row) -> OrmResult<RowResult> {
        let mut out = HashMap::with_capacity(row.len());
        for (idx, column) in row.columns().iter().enumerate() {
            let text = self.decode_cell(row, idx)?.into_text();
            out.insert(column.name().to_string(), text);
        }
        Ok(out)
    }

    /// Canonical text of a single column.
    pub fn decode_text(&self, row: &Row, idx: usize) -> OrmResult<String> {
        Ok(self.decode_cell(row, idx)?.into_text())
    }

    /// Read column `idx` as a typed [`Cell`].
    pub fn decode_cell(&self, row: &Row, idx: usize) -> OrmResult<Cell> {
        let column = row
            .columns()
            .get(idx)
            .ok_or_else(|| OrmError::decode(idx.to_string(), "column index out of range"))?;
        let ty = column.type_();
        let name = column.name();
        let err = |e: tokio_postgres::Error| OrmError::decode(name, e.to_string());

        let cell = match ColumnKind::of(ty) {
            ColumnKind::Integer => match *ty {
                Type::INT2 => get::<i16>(row, idx).map_err(err)?.map(|v| Cell::Integer(v.into())),
                Type::INT4 => get::<i32>(row, idx).map_err(err)?.map(|v| Cell::Integer(v.into())),
                _ => get::<i64>(row, idx).map_err(err)?.map(Cell::Integer),
            },
            ColumnKind::Unsigned => get::<u32>(row, idx).map_err(err)?.map(|v| Cell::Unsigned(v.into())),
            ColumnKind::Float => match *ty {
                Type::FLOAT4 => get::<f32>(row, idx).map_err(err)?.map(Cell::Real),
                _ => get::<f64>(row, idx).map_err(err)?.map(Cell::Float),
            },
            ColumnKind::Boolean => get::<bool>(row, idx).map_err(err)?.map(Cell::Boolean),
            ColumnKind::Text => get::<String>(row, idx).map_err(err)?.map(Cell::Text),
            ColumnKind::Binary => get::<Vec<u8>>(row, idx).map_err(err)?.map(Cell::Binary),
            ColumnKind::Timestamp => get::<NaiveDateTime>(row, idx)
                .map_err(err)?
                .map(|v| Cell::Timestamp(v.and_utc().fixed_offset())),
            ColumnKind::TimestampTz => get::<DateTime<Utc>>(row, idx)
                .map_err(err)?
                .map(|v| Cell::Timestamp(v.with_timezone(&self.offset))),
            ColumnKind::Date => get::<NaiveDate>(row, idx)
                .map_err(err)?
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|v| Cell::Timestamp(v.and_utc().fixed_offset())),
            ColumnKind::Time => get::<NaiveTime>(row, idx)
                .map_err(err)?
                .map(|t| Cell::Text(t.format(TIME_FORMAT).to_string())),
            ColumnKind::Uuid => get::<uuid::Uuid>(row, idx)
                .map_err(err)?
                .map(|u| Cell::Text(u.to_string())),
            ColumnKind::Json => get::<serde_json::Value>(row, idx)
                .map_err(err)?
                .map(|j| Cell::Text(j.to_string())),
            ColumnKind::Numeric => decode_numeric(row, idx, name)?,
            ColumnKind::Label => match get::<RawBytes<'_>>(row, idx).map_err(err)? {
                None => None,
                Some(RawBytes(raw)) => Some(Cell::Text(
                    std::str::from_utf8(raw)
                        .map_err(|e| OrmError::decode(name, e.to_string()))?
                        .to_string(),
                )),
            },
            ColumnKind::Other => match get::<RawBytes<'_>>(row, idx).map_err(err)? {
                None => None,
                Some(_) => {
                    return Err(OrmError::decode(
                        name,
                        format!("unsupported column type {ty}; cast it to text in SQL"),
                    ));
                }
            },
        };
        Ok(cell.unwrap_or(Cell::Null))
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(idx)
}

#[cfg(feature = "rust_decimal")]
fn decode_numeric(row: &Row, idx: usize, name: &str) -> OrmResult<Option<Cell>> {
    get::<rust_decimal::Decimal>(row, idx)
        .map(|v| v.map(|d| Cell::Text(d.to_string())))
        .map_err(|e| OrmError::decode(name, e.to_string()))
}

#[cfg(not(feature = "rust_decimal"))]
fn decode_numeric(row: &Row, idx: usize, name: &str) -> OrmResult<Option<Cell>> {
    match get::<RawBytes<'_>>(row, idx) {
        Ok(None) => Ok(None),
        Ok(Some(_)) => Err(OrmError::decode(
            name,
            "numeric columns need the `rust_decimal` feature (or cast to text in SQL)",
        )),
        Err(e) => Err(OrmError::decode(name, e.to_string())),
    }
}

/// Re-key rows by the value of `column`.
///
/// Rows where the column is empty (or missing) are dropped. When two rows
/// share a key the later one wins.
pub fn index_rows(rows: Vec<RowResult>, column: &str) -> HashMap<String, RowResult> {
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = match row.get(column) {
            Some(k) if !k.is_empty() => k.clone(),
            _ => continue,
        };
        out.insert(key, row);
    }
    out
}
