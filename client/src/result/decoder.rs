//! Wire result set → [`ResultSet`].
//!
//! The decoder checks every value against its column's declared type and
//! never coerces: an `Int32` column holding an `Int64` value is a decode
//! error, not a widening.

use std::sync::Arc;

use super::result_set::{Column, ResultSet, Row};
use crate::error::ClientError;
use crate::proto;
use crate::types::ProtoDeserializable;
use crate::types::value::{Value, ValueType};

/// Why a wire result set could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A column's type is unspecified or unknown.
    UnknownColumnType { column: String, raw: i32 },
    /// A row's value count differs from the column count.
    ColumnCount {
        row: usize,
        expected: usize,
        actual: usize,
    },
    /// A value is missing its payload or otherwise malformed.
    MalformedValue { row: usize, column: String, message: String },
    /// A non-null value does not match its column's declared type.
    ValueType {
        row: usize,
        column: String,
        declared: ValueType,
        actual: ValueType,
    },
    /// A null in a column not declared optional.
    UnexpectedNull { row: usize, column: String },
    /// The columns differ from the schema the caller expected.
    SchemaMismatch(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownColumnType { column, raw } => {
                write!(f, "column '{column}' has unknown type {raw}")
            }
            Self::ColumnCount {
                row,
                expected,
                actual,
            } => write!(f, "row {row} has {actual} values, expected {expected}"),
            Self::MalformedValue {
                row,
                column,
                message,
            } => write!(f, "row {row}, column '{column}': {message}"),
            Self::ValueType {
                row,
                column,
                declared,
                actual,
            } => write!(
                f,
                "row {row}, column '{column}' declared {declared} but holds {actual}"
            ),
            Self::UnexpectedNull { row, column } => {
                write!(f, "row {row}, column '{column}' is null but not optional")
            }
            Self::SchemaMismatch(message) => write!(f, "schema mismatch: {message}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for ClientError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

fn decode_columns(raw: Vec<proto::Column>) -> Result<Vec<Column>, DecodeError> {
    raw.into_iter()
        .enumerate()
        .map(|(position, column)| {
            let value_type = proto::ValueType::try_from(column.r#type)
                .ok()
                .and_then(|t| ValueType::try_from(t).ok())
                .ok_or_else(|| DecodeError::UnknownColumnType {
                    column: column.name.as_str().to_owned(),
                    raw: column.r#type,
                })?;
            Ok(Column {
                name: column.name,
                value_type,
                optional: column.optional,
                position,
            })
        })
        .collect()
}

fn check_schema(actual: &[Column], expected: &[Column]) -> Result<(), DecodeError> {
    if actual.len() != expected.len() {
        return Err(DecodeError::SchemaMismatch(format!(
            "{} columns, expected {}",
            actual.len(),
            expected.len()
        )));
    }
    for (got, want) in actual.iter().zip(expected) {
        if got.name != want.name || got.value_type != want.value_type || got.optional != want.optional
        {
            return Err(DecodeError::SchemaMismatch(format!(
                "column {} is '{}' {}{}, expected '{}' {}{}",
                got.position,
                got.name,
                got.value_type,
                if got.optional { "?" } else { "" },
                want.name,
                want.value_type,
                if want.optional { "?" } else { "" },
            )));
        }
    }
    Ok(())
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
fn decode_row(
    index: usize,
    raw: proto::Row,
    columns: &Arc<[Column]>,
) -> Result<Row, DecodeError> {
    if raw.values.len() != columns.len() {
        return Err(DecodeError::ColumnCount {
            row: index,
            expected: columns.len(),
            actual: raw.values.len(),
        });
    }

    let mut values = Vec::with_capacity(columns.len());
    for (column, raw_value) in columns.iter().zip(raw.values) {
        let value = Value::from_proto(raw_value).map_err(|message| DecodeError::MalformedValue {
            row: index,
            column: column.name.as_str().to_owned(),
            message,
        })?;
        match value.value_type() {
            None if !column.optional => {
                return Err(DecodeError::UnexpectedNull {
                    row: index,
                    column: column.name.as_str().to_owned(),
                });
            }
            Some(actual) if actual != column.value_type => {
                return Err(DecodeError::ValueType {
                    row: index,
                    column: column.name.as_str().to_owned(),
                    declared: column.value_type,
                    actual,
                });
            }
            _ => values.push(value),
        }
    }
    Ok(Row::new(Arc::clone(columns), values))
}

/// Decode `raw`, optionally requiring its columns to match `expected_schema`.
///
/// # Errors
///
/// Returns a [`DecodeError`] on an unknown column type, a schema mismatch, a
/// row with the wrong number of values, a malformed value, a value whose type
/// differs from its column, or a null in a non-optional column.
pub fn decode(
    raw: proto::ResultSet,
    expected_schema: Option<&[Column]>,
) -> Result<ResultSet, DecodeError> {
    let columns = decode_columns(raw.columns)?;
    if let Some(expected) = expected_schema {
        check_schema(&columns, expected)?;
    }

    let columns: Arc<[Column]> = Arc::from(columns);
    let rows = raw
        .rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| decode_row(index, row, &columns))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResultSet::new(columns, rows, raw.truncated))
}
