//! Decoded tabular results with typed, column-addressable rows.

use std::sync::Arc;

use crate::error::ClientError;
use crate::types::value::{Value, ValueType};

/// Declared shape of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
    /// Whether the column may hold nulls.
    pub optional: bool,
    /// Zero-based position in the row.
    pub position: usize,
}

/// Rows sharing one column schema.
///
/// # Invariants
///
/// - every row has exactly one value per column
/// - every non-null value has its column's declared type
/// - nulls appear only in optional columns
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
    truncated: bool,
}

impl ResultSet {
    pub(crate) const fn new(columns: Arc<[Column]>, rows: Vec<Row>, truncated: bool) -> Self {
        Self {
            columns,
            rows,
            truncated,
        }
    }

    /// A result set with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()), Vec::new(), false)
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Position of the column called `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the server cut the result short of the full row count.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Errors from typed row accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// No column with that name, or position out of range.
    ColumnNotFound(String),
    /// The value is null or has a different type than requested.
    TypeMismatch {
        column: String,
        expected: ValueType,
        actual: Option<ValueType>,
    },
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ColumnNotFound(column) => write!(f, "no such column: {column}"),
            Self::TypeMismatch {
                column,
                expected,
                actual: Some(actual),
            } => write!(f, "column '{column}' holds {actual}, requested {expected}"),
            Self::TypeMismatch {
                column,
                expected,
                actual: None,
            } => write!(f, "column '{column}' is null, requested {expected}"),
        }
    }
}

impl std::error::Error for RowError {}

impl From<RowError> for ClientError {
    fn from(e: RowError) -> Self {
        match e {
            RowError::ColumnNotFound(column) => Self::ColumnNotFound(column),
            RowError::TypeMismatch {
                column,
                expected,
                actual,
            } => Self::TypeMismatch {
                column,
                expected,
                actual,
            },
        }
    }
}

/// Ways to address a column: by position or by name.
pub trait ColumnIndex {
    fn resolve(&self, columns: &[Column]) -> Result<usize, RowError>;
}

impl ColumnIndex for usize {
    fn resolve(&self, columns: &[Column]) -> Result<usize, RowError> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(RowError::ColumnNotFound(format!(
                "position {self} (row has {} columns)",
                columns.len()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, columns: &[Column]) -> Result<usize, RowError> {
        columns
            .iter()
            .position(|column| column.name == *self)
            .ok_or_else(|| RowError::ColumnNotFound((*self).to_owned()))
    }
}

/// One row; values are addressed through the owning result set's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        #[doc = concat!("Read a non-null `", stringify!($variant), "` column.")]
        pub fn $name(&self, index: impl ColumnIndex) -> Result<$ty, RowError> {
            let (column, value) = self.lookup(&index)?;
            match value {
                Value::$variant(v) => Ok(*v),
                other => Err(RowError::TypeMismatch {
                    column: column.name.as_str().to_owned(),
                    expected: ValueType::$variant,
                    actual: other.value_type(),
                }),
            }
        }
    };
}

impl Row {
    pub(crate) const fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The raw value, null included.
    pub fn get(&self, index: impl ColumnIndex) -> Result<&Value, RowError> {
        self.lookup(&index).map(|(_, value)| value)
    }

    pub fn is_null(&self, index: impl ColumnIndex) -> Result<bool, RowError> {
        self.get(index).map(Value::is_null)
    }

    fn lookup(&self, index: &impl ColumnIndex) -> Result<(&Column, &Value), RowError> {
        let position = index.resolve(&self.columns)?;
        match (self.columns.get(position), self.values.get(position)) {
            (Some(column), Some(value)) => Ok((column, value)),
            _ => Err(RowError::ColumnNotFound(format!("position {position}"))),
        }
    }

    typed_getter!(get_bool, Bool, bool);
    typed_getter!(get_int32, Int32, i32);
    typed_getter!(get_uint32, Uint32, u32);
    typed_getter!(get_int64, Int64, i64);
    typed_getter!(get_uint64, Uint64, u64);
    typed_getter!(get_double, Double, f64);

    /// Read a non-null `Text` column.
    pub fn get_text(&self, index: impl ColumnIndex) -> Result<&str, RowError> {
        let (column, value) = self.lookup(&index)?;
        match value {
            Value::Text(text) => Ok(text),
            other => Err(RowError::TypeMismatch {
                column: column.name.as_str().to_owned(),
                expected: ValueType::Text,
                actual: other.value_type(),
            }),
        }
    }

    /// Read a non-null `Bytes` column.
    pub fn get_bytes(&self, index: impl ColumnIndex) -> Result<&[u8], RowError> {
        let (column, value) = self.lookup(&index)?;
        match value {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(RowError::TypeMismatch {
                column: column.name.as_str().to_owned(),
                expected: ValueType::Bytes,
                actual: other.value_type(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        let columns: Arc<[Column]> = Arc::from(vec![
            Column {
                name: "id".to_string(),
                value_type: ValueType::Int32,
                optional: false,
                position: 0,
            },
            Column {
                name: "name".to_string(),
                value_type: ValueType::Text,
                optional: true,
                position: 1,
            },
        ]);
        let rows = vec![
            Row::new(
                Arc::clone(&columns),
                vec![Value::Int32(1), Value::Text("ada".to_string())],
            ),
            Row::new(Arc::clone(&columns), vec![Value::Int32(2), Value::Null]),
        ];
        ResultSet::new(columns, rows, false)
    }

    #[test]
    fn test_access_by_position_and_name() {
        let result = sample();
        let row = result.row(0).unwrap();
        assert_eq!(row.get_int32(0).unwrap(), 1);
        assert_eq!(row.get_int32("id").unwrap(), 1);
        assert_eq!(row.get_text("name").unwrap(), "ada");
        assert_eq!(result.column_index("name"), Some(1));
    }

    #[test]
    fn test_wrong_type_is_type_mismatch() {
        let result = sample();
        let error = result.row(0).unwrap().get_int64("id").unwrap_err();
        assert_eq!(
            error,
            RowError::TypeMismatch {
                column: "id".to_string(),
                expected: ValueType::Int64,
                actual: Some(ValueType::Int32),
            }
        );
    }

    #[test]
    fn test_null_is_type_mismatch() {
        let result = sample();
        let row = result.row(1).unwrap();
        assert!(row.is_null("name").unwrap());
        let error: ClientError = row.get_text("name").unwrap_err().into();
        assert_eq!(error.kind(), crate::error::ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_unknown_column_is_distinct_error() {
        let result = sample();
        let row = result.row(0).unwrap();
        assert!(matches!(row.get_bool("missing"), Err(RowError::ColumnNotFound(_))));
        let error: ClientError = row.get_bool(7).unwrap_err().into();
        assert_eq!(error.kind(), crate::error::ErrorKind::ColumnNotFound);
    }

    #[test]
    fn test_iterates_rows() {
        let result = sample();
        let ids: Vec<i32> = result.iter().map(|row| row.get_int32(0).unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(result.row_count(), 2);
        assert!(!result.truncated());
    }
}
