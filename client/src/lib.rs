// Life of a request:
// 1. Caller acquires a session from the pool (created lazily, capped)
// 2. Transaction controller begins a transaction on it, or the query
//    carries its own begin-and-commit control
// 3. Query executor validates text and parameters, then sends the request
//    through the transport
// 4. For buffered queries:
//     - Decode every result set against its declared columns
//     - Return typed rows
//    For scans:
//     - Hand back a stream that decodes one batch per response
//     - Surface the terminal status after the last batch
// 5. Session returns to the pool, or is discarded if it broke
//
// System components:
//  - Transport binding (TCP + frame codec)
//  - Session pool
//  - Transaction controller
//  - Query executor and result decoder
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)
)]

pub mod client;
pub mod config;
pub mod error;
pub mod proto;
pub mod query;
pub mod result;
pub mod session;
pub mod testing;
pub mod transaction;
pub mod transport;
pub mod types;

mod e2e_tests;

pub use client::TableClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ConnectivityKind, ErrorKind};
pub use query::{QueryExecutor, ScanMode, ScanSettings, ScanState, ScanStream};
pub use result::{Column, ResultSet, Row};
pub use session::{PoolSettings, PoolStats, PooledSession, SessionPool};
pub use transaction::{TransactionContext, TransactionController, TxMode, TxState};
pub use transport::{CallOptions, TcpSettings, TcpTransport, Transport, TransportError};
pub use types::endpoint::Endpoint;
pub use types::issue::{Issue, Severity};
pub use types::query_request::{Params, QueryRequest};
pub use types::value::{Value, ValueType};
