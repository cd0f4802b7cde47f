//! In-process stand-in for the database server.
//!
//! Keeps sessions and open transactions in memory, answers literal `select`
//! statements, and replays scripted scan results so tests can drive
//! mid-stream failures and disconnects.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::select::{Statement, evaluate, normalize};
use crate::proto;
use crate::types::ProtoSerializable;
use crate::types::value::Value;

/// How a scripted scan ends after its batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// A final success response with `end_of_stream` set.
    Success,
    /// A final response with a non-success status and one issue.
    Failure {
        status: proto::StatusCode,
        message: String,
    },
    /// The channel drops without a final response.
    Disconnect,
}

/// Canned answer to one scan query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanScript {
    pub batches: Vec<proto::ResultSet>,
    pub end: ScanEnd,
}

/// Responses to one scan request, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReply {
    pub responses: Vec<proto::ServerResponse>,
    /// The channel is dropped after the last response.
    pub disconnected: bool,
}

struct FakeState {
    rng: StdRng,
    /// Session id to the ids of its open transactions.
    sessions: HashMap<String, HashSet<String>>,
    scripts: HashMap<String, ScanScript>,
    protocol_version: u32,
    committed: u64,
    rolled_back: u64,
}

pub struct FakeDatabase {
    database: String,
    state: Mutex<FakeState>,
}

impl FakeDatabase {
    #[must_use]
    pub fn new(database: &str) -> Self {
        Self::with_rng(database, StdRng::from_os_rng())
    }

    /// A database whose session and transaction ids follow from `seed`.
    #[must_use]
    pub fn with_seed(database: &str, seed: u64) -> Self {
        Self::with_rng(database, StdRng::seed_from_u64(seed))
    }

    fn with_rng(database: &str, rng: StdRng) -> Self {
        Self {
            database: database.to_owned(),
            state: Mutex::new(FakeState {
                rng,
                sessions: HashMap::new(),
                scripts: HashMap::new(),
                protocol_version: proto::PROTOCOL_VERSION,
                committed: 0,
                rolled_back: 0,
            }),
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    // A panic while holding the lock only happens in a failing test.
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Protocol version the handshake reports from now on.
    pub fn set_protocol_version(&self, version: u32) {
        self.lock().protocol_version = version;
    }

    /// Answer every later scan of `query` with `script`.
    pub fn script_scan(&self, query: &str, script: ScanScript) {
        self.lock().scripts.insert(normalize(query), script);
    }

    /// Forget a session, as a server does after a restart.
    pub fn forget_session(&self, session_id: &str) {
        self.lock().sessions.remove(session_id);
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    /// Transactions begun and not yet committed or rolled back, across sessions.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.lock().sessions.values().map(HashSet::len).sum()
    }

    #[must_use]
    pub fn committed_transactions(&self) -> u64 {
        self.lock().committed
    }

    #[must_use]
    pub fn rolled_back_transactions(&self) -> u64 {
        self.lock().rolled_back
    }

    /// Answer a connection handshake.
    #[must_use]
    pub fn handshake(&self, request: &proto::HandshakeRequest) -> proto::ServerResponse {
        if request.database != self.database {
            return proto::ServerResponse::failure(
                0,
                proto::StatusCode::NotFound,
                format!("database {} not found", request.database),
            );
        }
        proto::ServerResponse {
            result: Some(proto::server_response::Result::Handshake(
                proto::HandshakeResult {
                    protocol_version: self.lock().protocol_version,
                },
            )),
            ..proto::ServerResponse::success(0)
        }
    }

    /// Answer one unary request.
    #[must_use]
    pub fn handle(&self, request: proto::ClientRequest) -> proto::ServerResponse {
        use proto::client_request::Payload;

        let request_id = request.request_id;
        let Some(payload) = request.payload else {
            return proto::ServerResponse::failure(
                request_id,
                proto::StatusCode::BadRequest,
                "request has no payload",
            );
        };

        let mut response = match payload {
            Payload::Handshake(handshake) => self.handshake(&handshake),
            Payload::CreateSession(_) => self.lock().create_session(),
            Payload::DeleteSession(delete) => self.lock().delete_session(&delete.session_id),
            Payload::BeginTransaction(begin) => self.lock().begin(&begin),
            Payload::CommitTransaction(commit) => {
                self.lock()
                    .finish(&commit.session_id, &commit.tx_id, true)
            }
            Payload::RollbackTransaction(rollback) => {
                self.lock()
                    .finish(&rollback.session_id, &rollback.tx_id, false)
            }
            Payload::ExecuteDataQuery(query) => self.lock().execute(query),
            Payload::ExecuteScanQuery(_) => proto::ServerResponse::failure(
                0,
                proto::StatusCode::BadRequest,
                "scan queries need a streaming call",
            ),
        };
        response.request_id = request_id;
        response
    }

    /// Answer one scan request with its whole response sequence.
    #[must_use]
    pub fn scan(&self, request: proto::ClientRequest) -> ScanReply {
        let request_id = request.request_id;
        let mut reply = match request.payload {
            Some(proto::client_request::Payload::ExecuteScanQuery(scan)) => self.lock().scan(&scan),
            _ => ScanReply {
                responses: vec![proto::ServerResponse::failure(
                    0,
                    proto::StatusCode::BadRequest,
                    "streaming call without a scan query",
                )],
                disconnected: false,
            },
        };
        for response in &mut reply.responses {
            response.request_id = request_id;
        }
        reply
    }
}

impl std::fmt::Debug for FakeDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeDatabase")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

fn query_response(result: proto::ExecuteQueryResult) -> proto::ServerResponse {
    proto::ServerResponse {
        result: Some(proto::server_response::Result::Query(result)),
        ..proto::ServerResponse::success(0)
    }
}

fn scan_part(part: proto::ScanQueryPart, end_of_stream: bool) -> proto::ServerResponse {
    proto::ServerResponse {
        end_of_stream,
        result: Some(proto::server_response::Result::ScanPart(part)),
        ..proto::ServerResponse::success(0)
    }
}

fn unknown_session(session_id: &str) -> proto::ServerResponse {
    proto::ServerResponse::failure(
        0,
        proto::StatusCode::BadSession,
        format!("session {session_id} not found"),
    )
}

impl FakeState {
    fn new_id(&mut self, prefix: &str) -> String {
        format!("{prefix}-{:016x}", self.rng.random::<u64>())
    }

    fn create_session(&mut self) -> proto::ServerResponse {
        let session_id = self.new_id("session");
        self.sessions.insert(session_id.as_str().to_owned(), HashSet::new());
        debug!("Fake database created session {session_id}");
        proto::ServerResponse {
            result: Some(proto::server_response::Result::Session(
                proto::CreateSessionResult { session_id },
            )),
            ..proto::ServerResponse::success(0)
        }
    }

    fn delete_session(&mut self, session_id: &str) -> proto::ServerResponse {
        match self.sessions.remove(session_id) {
            Some(transactions) => {
                self.rolled_back += transactions.len() as u64;
                proto::ServerResponse::success(0)
            }
            None => unknown_session(session_id),
        }
    }

    fn begin(&mut self, request: &proto::BeginTransactionRequest) -> proto::ServerResponse {
        if !self.sessions.contains_key(&request.session_id) {
            return unknown_session(&request.session_id);
        }
        match proto::TransactionMode::try_from(request.mode) {
            Ok(proto::TransactionMode::SerializableReadWrite | proto::TransactionMode::SnapshotReadOnly) => {}
            _ => {
                return proto::ServerResponse::failure(
                    0,
                    proto::StatusCode::BadRequest,
                    format!("mode {} cannot begin an interactive transaction", request.mode),
                );
            }
        }

        let tx_id = self.new_id("tx");
        if let Some(transactions) = self.sessions.get_mut(&request.session_id) {
            transactions.insert(tx_id.as_str().to_owned());
        }
        proto::ServerResponse {
            result: Some(proto::server_response::Result::Transaction(
                proto::BeginTransactionResult { tx_id },
            )),
            ..proto::ServerResponse::success(0)
        }
    }

    fn finish(&mut self, session_id: &str, tx_id: &str, commit: bool) -> proto::ServerResponse {
        let Some(transactions) = self.sessions.get_mut(session_id) else {
            return unknown_session(session_id);
        };
        if !transactions.remove(tx_id) {
            return proto::ServerResponse::failure(
                0,
                proto::StatusCode::NotFound,
                format!("transaction {tx_id} not found"),
            );
        }
        if commit {
            self.committed += 1;
        } else {
            self.rolled_back += 1;
        }
        proto::ServerResponse::success(0)
    }

    fn execute(&mut self, request: proto::ExecuteDataQueryRequest) -> proto::ServerResponse {
        if !self.sessions.contains_key(&request.session_id) {
            return unknown_session(&request.session_id);
        }
        let Some(tx_control) = request.tx_control else {
            return proto::ServerResponse::failure(
                0,
                proto::StatusCode::BadRequest,
                "data query without a transaction control",
            );
        };

        let (tx_id, begun) = match tx_control.selector {
            Some(proto::tx_control::Selector::TxId(tx_id)) => {
                let known = self
                    .sessions
                    .get(&request.session_id)
                    .is_some_and(|transactions| transactions.contains(&tx_id));
                if !known {
                    return proto::ServerResponse::failure(
                        0,
                        proto::StatusCode::NotFound,
                        format!("transaction {tx_id} not found"),
                    );
                }
                (tx_id, false)
            }
            Some(proto::tx_control::Selector::BeginTx(mode))
                if proto::TransactionMode::try_from(mode)
                    .is_ok_and(|mode| mode != proto::TransactionMode::Unspecified) =>
            {
                (self.new_id("tx"), true)
            }
            _ => {
                return proto::ServerResponse::failure(
                    0,
                    proto::StatusCode::BadRequest,
                    "transaction control selects no transaction",
                );
            }
        };

        let result_sets = match evaluate(&request.query, &request.parameters) {
            Ok(Statement::Select(result)) => vec![result],
            Ok(Statement::Modification) => Vec::new(),
            Err(e) => return proto::ServerResponse::failure(0, e.status, e.message),
        };

        let transactions = self.sessions.entry(request.session_id).or_default();
        if tx_control.commit_tx {
            transactions.remove(&tx_id);
            self.committed += 1;
            return query_response(proto::ExecuteQueryResult {
                result_sets,
                tx_id: String::new(),
            });
        }
        if begun {
            transactions.insert(tx_id.as_str().to_owned());
        }
        query_response(proto::ExecuteQueryResult { result_sets, tx_id })
    }

    #[allow(clippy::disallowed_methods)] // scripts replay on every scan of their query
    fn scan(&self, request: &proto::ExecuteScanQueryRequest) -> ScanReply {
        let reply = |responses| ScanReply {
            responses,
            disconnected: false,
        };
        if !self.sessions.contains_key(&request.session_id) {
            return reply(vec![unknown_session(&request.session_id)]);
        }

        let query = normalize(&request.query);
        if request.mode == i32::from(proto::ScanMode::Explain) {
            let plan = proto::ScanQueryPart {
                result_set: None,
                query_plan: format!("ConstantExpr [{query}]"),
            };
            return reply(vec![scan_part(plan, true)]);
        }

        if let Some(script) = self.scripts.get(&query) {
            let mut responses: Vec<_> = script
                .batches
                .iter()
                .map(|batch| {
                    let part = proto::ScanQueryPart {
                        result_set: Some(batch.clone()),
                        query_plan: String::new(),
                    };
                    scan_part(part, false)
                })
                .collect();
            let disconnected = match &script.end {
                ScanEnd::Success => {
                    responses.push(scan_part(proto::ScanQueryPart::default(), true));
                    false
                }
                ScanEnd::Failure { status, message } => {
                    responses.push(proto::ServerResponse::failure(0, *status, message.as_str()));
                    false
                }
                ScanEnd::Disconnect => true,
            };
            return ScanReply {
                responses,
                disconnected,
            };
        }

        let result = match evaluate(&request.query, &request.parameters) {
            Ok(Statement::Select(result)) => result,
            Ok(Statement::Modification) => {
                return reply(vec![proto::ServerResponse::failure(
                    0,
                    proto::StatusCode::BadRequest,
                    "scan queries cannot modify data",
                )]);
            }
            Err(e) => return reply(vec![proto::ServerResponse::failure(0, e.status, e.message)]),
        };

        let chunk = match usize::try_from(request.max_rows_per_batch) {
            Ok(0) | Err(_) => result.rows.len().max(1),
            Ok(limit) => limit,
        };
        let mut responses: Vec<_> = result
            .rows
            .chunks(chunk)
            .map(|rows| {
                let part = proto::ScanQueryPart {
                    result_set: Some(proto::ResultSet {
                        columns: result.columns.clone(),
                        rows: rows.to_vec(),
                        truncated: false,
                    }),
                    query_plan: String::new(),
                };
                scan_part(part, false)
            })
            .collect();
        responses.push(scan_part(proto::ScanQueryPart::default(), true));
        reply(responses)
    }
}

/// A batch with one non-optional `Int32` column.
#[must_use]
pub fn int32_batch(column: &str, values: impl IntoIterator<Item = i32>) -> proto::ResultSet {
    proto::ResultSet {
        columns: vec![proto::Column {
            name: column.to_owned(),
            r#type: proto::ValueType::Int32.into(),
            optional: false,
        }],
        rows: values
            .into_iter()
            .map(|value| proto::Row {
                values: vec![Value::Int32(value).to_proto()],
            })
            .collect(),
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payload: proto::client_request::Payload) -> proto::ClientRequest {
        proto::ClientRequest {
            request_id: 7,
            operation_timeout: None,
            payload: Some(payload),
        }
    }

    fn create_session(database: &FakeDatabase) -> String {
        let response = database.handle(request(proto::client_request::Payload::CreateSession(
            proto::CreateSessionRequest {},
        )));
        match response.result {
            Some(proto::server_response::Result::Session(result)) => result.session_id,
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_handshake_checks_database() {
        let database = FakeDatabase::new("/local");
        let ok = database.handshake(&proto::HandshakeRequest {
            database: "/local".to_string(),
            protocol_version: proto::PROTOCOL_VERSION,
        });
        assert_eq!(ok.status_code(), proto::StatusCode::Success);

        let wrong = database.handshake(&proto::HandshakeRequest {
            database: "/other".to_string(),
            protocol_version: proto::PROTOCOL_VERSION,
        });
        assert_eq!(wrong.status_code(), proto::StatusCode::NotFound);
    }

    #[test]
    fn test_responses_echo_request_id() {
        let database = FakeDatabase::new("/local");
        let response = database.handle(request(proto::client_request::Payload::DeleteSession(
            proto::DeleteSessionRequest {
                session_id: "missing".to_string(),
            },
        )));
        assert_eq!(response.request_id, 7);
        assert_eq!(response.status_code(), proto::StatusCode::BadSession);
    }

    #[test]
    fn test_seeded_ids_repeat() {
        let first = FakeDatabase::with_seed("/local", 42);
        let second = FakeDatabase::with_seed("/local", 42);
        assert_eq!(create_session(&first), create_session(&second));
    }

    #[test]
    fn test_deleting_a_session_rolls_back_its_transactions() {
        let database = FakeDatabase::new("/local");
        let session_id = create_session(&database);
        let _ = database.handle(request(proto::client_request::Payload::BeginTransaction(
            proto::BeginTransactionRequest {
                session_id: session_id.as_str().to_owned(),
                mode: proto::TransactionMode::SerializableReadWrite.into(),
            },
        )));
        assert_eq!(database.open_transactions(), 1);

        let _ = database.handle(request(proto::client_request::Payload::DeleteSession(
            proto::DeleteSessionRequest { session_id },
        )));
        assert_eq!(database.open_transactions(), 0);
        assert_eq!(database.rolled_back_transactions(), 1);
    }

    #[test]
    fn test_scripted_scan_replays() {
        let database = FakeDatabase::new("/local");
        let session_id = create_session(&database);
        database.script_scan(
            "select * from numbers;",
            ScanScript {
                batches: vec![int32_batch("n", [1, 2]), int32_batch("n", [3])],
                end: ScanEnd::Disconnect,
            },
        );

        for _ in 0..2 {
            let reply = database.scan(request(proto::client_request::Payload::ExecuteScanQuery(
                proto::ExecuteScanQueryRequest {
                    session_id: session_id.as_str().to_owned(),
                    query: "SELECT * FROM numbers".to_string(),
                    ..Default::default()
                },
            )));
            assert_eq!(reply.responses.len(), 2);
            assert!(reply.disconnected);
        }
    }

    #[test]
    fn test_unscripted_scan_splits_rows() {
        let database = FakeDatabase::new("/local");
        let session_id = create_session(&database);
        let reply = database.scan(request(proto::client_request::Payload::ExecuteScanQuery(
            proto::ExecuteScanQueryRequest {
                session_id,
                query: "select 42;".to_string(),
                mode: proto::ScanMode::Execute.into(),
                ..Default::default()
            },
        )));
        assert_eq!(reply.responses.len(), 2);
        assert!(reply.responses[1].end_of_stream);
        assert!(!reply.disconnected);
    }
}
