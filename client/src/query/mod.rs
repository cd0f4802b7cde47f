//! Query execution: buffered data queries inside a transaction and
//! streaming scans outside one.

mod executor;
mod scan;

pub use executor::QueryExecutor;
pub use scan::{ScanMode, ScanSettings, ScanState, ScanStream};
