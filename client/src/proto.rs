//! Wire messages exchanged with the database endpoint.
//!
//! Every request travels as a [`ClientRequest`] envelope and every reply as a
//! [`ServerResponse`]. A response always decomposes into a status code, an
//! issue list, and an optional payload. Scan queries answer with a sequence of
//! responses carrying [`ScanQueryPart`] payloads; the last one has
//! `end_of_stream` set or a non-success status.

#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::all)]

/// Version sent in the connection handshake.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unspecified = 0,
    Success = 1,
    BadRequest = 2,
    Unauthorized = 3,
    InternalError = 4,
    Aborted = 5,
    Unavailable = 6,
    Overloaded = 7,
    SchemeError = 8,
    GenericError = 9,
    Timeout = 10,
    BadSession = 11,
    PreconditionFailed = 12,
    NotFound = 13,
    SessionBusy = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum IssueSeverity {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TransactionMode {
    Unspecified = 0,
    SerializableReadWrite = 1,
    SnapshotReadOnly = 2,
    StaleReadOnly = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ScanMode {
    Unspecified = 0,
    Execute = 1,
    Explain = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    Unspecified = 0,
    Bool = 1,
    Int32 = 2,
    Uint32 = 3,
    Int64 = 4,
    Uint64 = 5,
    Double = 6,
    Text = 7,
    Bytes = 8,
}

/// A diagnostic entry attached to a response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Issue {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(enumeration = "IssueSeverity", tag = "3")]
    pub severity: i32,
    #[prost(message, repeated, tag = "4")]
    pub issues: ::prost::alloc::vec::Vec<Issue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub value: ::core::option::Option<typed_value::Value>,
}

pub mod typed_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "1")]
        NullFlag(bool),
        #[prost(bool, tag = "2")]
        Bool(bool),
        #[prost(int32, tag = "3")]
        Int32(i32),
        #[prost(uint32, tag = "4")]
        Uint32(u32),
        #[prost(int64, tag = "5")]
        Int64(i64),
        #[prost(uint64, tag = "6")]
        Uint64(u64),
        #[prost(double, tag = "7")]
        Double(f64),
        #[prost(string, tag = "8")]
        Text(::prost::alloc::string::String),
        #[prost(bytes = "vec", tag = "9")]
        Bytes(::prost::alloc::vec::Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Column {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "ValueType", tag = "2")]
    pub r#type: i32,
    #[prost(bool, tag = "3")]
    pub optional: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Row {
    #[prost(message, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultSet {
    #[prost(message, repeated, tag = "1")]
    pub columns: ::prost::alloc::vec::Vec<Column>,
    #[prost(message, repeated, tag = "2")]
    pub rows: ::prost::alloc::vec::Vec<Row>,
    #[prost(bool, tag = "3")]
    pub truncated: bool,
}

/// Transaction selector for a data query.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TxControl {
    #[prost(oneof = "tx_control::Selector", tags = "1, 2")]
    pub selector: ::core::option::Option<tx_control::Selector>,
    #[prost(bool, tag = "3")]
    pub commit_tx: bool,
}

pub mod tx_control {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Selector {
        #[prost(string, tag = "1")]
        TxId(::prost::alloc::string::String),
        #[prost(enumeration = "super::TransactionMode", tag = "2")]
        BeginTx(i32),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandshakeRequest {
    #[prost(string, tag = "1")]
    pub database: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub protocol_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSessionRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(enumeration = "TransactionMode", tag = "2")]
    pub mode: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub tx_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RollbackTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub tx_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteDataQueryRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub tx_control: ::core::option::Option<TxControl>,
    #[prost(string, tag = "3")]
    pub query: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "4")]
    pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteScanQueryRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub query: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "3")]
    pub parameters: ::std::collections::HashMap<::prost::alloc::string::String, TypedValue>,
    #[prost(enumeration = "ScanMode", tag = "4")]
    pub mode: i32,
    #[prost(uint32, tag = "5")]
    pub max_rows_per_batch: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientRequest {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(message, optional, tag = "2")]
    pub operation_timeout: ::core::option::Option<::prost_types::Duration>,
    #[prost(oneof = "client_request::Payload", tags = "3, 4, 5, 6, 7, 8, 9, 10")]
    pub payload: ::core::option::Option<client_request::Payload>,
}

pub mod client_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        Handshake(super::HandshakeRequest),
        #[prost(message, tag = "4")]
        CreateSession(super::CreateSessionRequest),
        #[prost(message, tag = "5")]
        DeleteSession(super::DeleteSessionRequest),
        #[prost(message, tag = "6")]
        BeginTransaction(super::BeginTransactionRequest),
        #[prost(message, tag = "7")]
        CommitTransaction(super::CommitTransactionRequest),
        #[prost(message, tag = "8")]
        RollbackTransaction(super::RollbackTransactionRequest),
        #[prost(message, tag = "9")]
        ExecuteDataQuery(super::ExecuteDataQueryRequest),
        #[prost(message, tag = "10")]
        ExecuteScanQuery(super::ExecuteScanQueryRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandshakeResult {
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionResult {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransactionResult {
    #[prost(string, tag = "1")]
    pub tx_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteQueryResult {
    #[prost(message, repeated, tag = "1")]
    pub result_sets: ::prost::alloc::vec::Vec<ResultSet>,
    #[prost(string, tag = "2")]
    pub tx_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScanQueryPart {
    #[prost(message, optional, tag = "1")]
    pub result_set: ::core::option::Option<ResultSet>,
    #[prost(string, tag = "2")]
    pub query_plan: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerResponse {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<Issue>,
    #[prost(bool, tag = "4")]
    pub end_of_stream: bool,
    #[prost(oneof = "server_response::Result", tags = "5, 6, 7, 8, 9")]
    pub result: ::core::option::Option<server_response::Result>,
}

pub mod server_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "5")]
        Handshake(super::HandshakeResult),
        #[prost(message, tag = "6")]
        Session(super::CreateSessionResult),
        #[prost(message, tag = "7")]
        Transaction(super::BeginTransactionResult),
        #[prost(message, tag = "8")]
        Query(super::ExecuteQueryResult),
        #[prost(message, tag = "9")]
        ScanPart(super::ScanQueryPart),
    }
}

impl ServerResponse {
    /// A success response with no payload.
    #[must_use]
    pub fn success(request_id: u64) -> Self {
        Self {
            request_id,
            status: StatusCode::Success.into(),
            ..Default::default()
        }
    }

    /// A failed response carrying one error issue.
    #[must_use]
    pub fn failure(request_id: u64, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: status.into(),
            issues: vec![Issue {
                message: message.into(),
                code: status as u32,
                severity: IssueSeverity::Error.into(),
                issues: Vec::new(),
            }],
            ..Default::default()
        }
    }

    /// Decode the status field, mapping unknown values to `Unspecified`.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::try_from(self.status).unwrap_or(StatusCode::Unspecified)
    }
}
