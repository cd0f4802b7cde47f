//! Typed results and the decoder that produces them.

mod decoder;
mod result_set;

pub use decoder::{DecodeError, decode};
pub use result_set::{Column, ColumnIndex, ResultSet, Row, RowError};
