//! Buffered and streaming query execution.
//!
//! Every entry point validates its [`QueryRequest`] before any I/O, so a
//! request with an unbound parameter never reaches the transport.

use tracing::debug;

use super::scan::{ScanSettings, ScanStream};
use crate::error::ClientError;
use crate::proto;
use crate::result::{ResultSet, decode};
use crate::session::PooledSession;
use crate::transaction::{TransactionContext, TxMode, TxState};
use crate::transport::CallOptions;
use crate::types::query_request::QueryRequest;

/// Sends queries on pooled sessions and decodes what comes back.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run `request` inside `context` and return its first result set.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::execute_buffered_with`].
    pub async fn execute_buffered(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        request: &QueryRequest,
    ) -> Result<ResultSet, ClientError> {
        self.execute_buffered_with(session, context, request, CallOptions::new())
            .await
    }

    /// Run `request` inside `context` under `options` and return its first
    /// result set, or an empty one when the statement produced none.
    ///
    /// # Pre-conditions
    ///
    /// - `context` is open on `session`
    ///
    /// # Post-conditions
    ///
    /// - on success `context` is still open
    /// - if the server aborted the transaction or lost the session, `context`
    ///   is `RolledBack`
    /// - if the transport failed, `context` is `Broken`
    ///
    /// # Errors
    ///
    /// - `InvalidQuery`, `ParameterBinding` or `InvalidState` before any I/O
    /// - `Connectivity`, `Timeout` or `Cancelled` from the transport
    /// - `Execution` for a non-success status, `Decode` for a malformed result
    pub async fn execute_buffered_with(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        request: &QueryRequest,
        options: CallOptions,
    ) -> Result<ResultSet, ClientError> {
        let result_sets = self
            .execute_in(session, context, request, options, false)
            .await?;
        Ok(result_sets.into_iter().next().unwrap_or_else(ResultSet::empty))
    }

    /// Run `request` inside `context` and return every result set it produced.
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::execute_buffered_with`].
    pub async fn execute_buffered_all(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        request: &QueryRequest,
        options: CallOptions,
    ) -> Result<Vec<ResultSet>, ClientError> {
        self.execute_in(session, context, request, options, false)
            .await
    }

    /// Run `request` and commit `context` in the same round trip.
    ///
    /// # Post-conditions
    ///
    /// - on success `context` is `Committed` and the session is free for a
    ///   new transaction
    /// - a rejected request leaves `context` `RolledBack`; a transport
    ///   failure leaves it `Broken`
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::execute_buffered_with`].
    pub async fn execute_and_commit(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        request: &QueryRequest,
        options: CallOptions,
    ) -> Result<Vec<ResultSet>, ClientError> {
        self.execute_in(session, context, request, options, true)
            .await
    }

    /// Begin a transaction in `mode`, run `request` and commit, all in one
    /// request.
    ///
    /// # Errors
    ///
    /// - `InvalidQuery` or `ParameterBinding` before any I/O
    /// - `InvalidState` if `session` already has an open transaction
    /// - transport, server and decode errors as for buffered execution
    pub async fn execute_once(
        &self,
        session: &mut PooledSession,
        mode: TxMode,
        request: &QueryRequest,
        options: CallOptions,
    ) -> Result<Vec<ResultSet>, ClientError> {
        request.validate()?;
        if session.has_open_transaction() {
            return Err(ClientError::InvalidState(format!(
                "session {} already has an open transaction",
                session.id()
            )));
        }

        let tx_control = proto::TxControl {
            selector: Some(proto::tx_control::Selector::BeginTx(mode.to_proto().into())),
            commit_tx: true,
        };
        debug!("Running one-shot {mode} query on session {}", session.id());
        let result = send_data_query(session, tx_control, request, options).await?;
        decode_all(result)
    }

    /// Start a scan of `request` outside any transaction.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::execute_streaming_with`].
    pub async fn execute_streaming<'a>(
        &self,
        session: &'a mut PooledSession,
        request: &QueryRequest,
        settings: ScanSettings,
    ) -> Result<ScanStream<'a>, ClientError> {
        self.execute_streaming_with(session, request, settings, CallOptions::new())
            .await
    }

    /// Start a scan of `request` under `options`.
    ///
    /// The deadline in `options` covers the whole scan, every batch included.
    /// Failures after the scan started are delivered by the stream itself.
    ///
    /// # Errors
    ///
    /// - `InvalidQuery` or `ParameterBinding` before any I/O
    /// - transport errors while sending the request
    pub async fn execute_streaming_with<'a>(
        &self,
        session: &'a mut PooledSession,
        request: &QueryRequest,
        settings: ScanSettings,
        options: CallOptions,
    ) -> Result<ScanStream<'a>, ClientError> {
        request.validate()?;

        let payload = proto::client_request::Payload::ExecuteScanQuery(proto::ExecuteScanQueryRequest {
            session_id: session.id().to_owned(),
            query: request.text().to_owned(),
            parameters: request.params().to_proto_map(),
            mode: settings.mode.to_proto().into(),
            max_rows_per_batch: settings.max_rows_per_batch,
        });
        debug!("Starting {:?} scan on session {}", settings.mode, session.id());
        let responses = session.open_stream(payload, options).await?;
        Ok(ScanStream::new(session, responses))
    }

    async fn execute_in(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        request: &QueryRequest,
        options: CallOptions,
        commit: bool,
    ) -> Result<Vec<ResultSet>, ClientError> {
        request.validate()?;
        context.ensure_open_on(session)?;

        // Local-only modes run each statement in its own server transaction.
        let tx_control = match context.tx_id() {
            Some(tx_id) => proto::TxControl {
                selector: Some(proto::tx_control::Selector::TxId(tx_id.to_owned())),
                commit_tx: commit,
            },
            None => proto::TxControl {
                selector: Some(proto::tx_control::Selector::BeginTx(
                    context.mode().to_proto().into(),
                )),
                commit_tx: true,
            },
        };

        match send_data_query(session, tx_control, request, options).await {
            Ok(result) => {
                if commit {
                    context.finish(session, TxState::Committed);
                }
                decode_all(result)
            }
            Err(e) => {
                if let Some(state) = context_after_failure(&e, commit) {
                    context.finish(session, state);
                }
                Err(e)
            }
        }
    }
}

/// Where a failed data query leaves its transaction, `None` if still open.
const fn context_after_failure(error: &ClientError, commit: bool) -> Option<TxState> {
    match error {
        ClientError::Connectivity { .. }
        | ClientError::Timeout { .. }
        | ClientError::Cancelled { .. } => Some(TxState::Broken),
        ClientError::Execution { .. } if commit => Some(TxState::RolledBack),
        ClientError::Execution {
            status:
                proto::StatusCode::Aborted
                | proto::StatusCode::BadSession
                | proto::StatusCode::NotFound,
            ..
        } => Some(TxState::RolledBack),
        _ => None,
    }
}

async fn send_data_query(
    session: &mut PooledSession,
    tx_control: proto::TxControl,
    request: &QueryRequest,
    options: CallOptions,
) -> Result<proto::ExecuteQueryResult, ClientError> {
    let payload = proto::client_request::Payload::ExecuteDataQuery(proto::ExecuteDataQueryRequest {
        session_id: session.id().to_owned(),
        tx_control: Some(tx_control),
        query: request.text().to_owned(),
        parameters: request.params().to_proto_map(),
    });
    let response = session.call(payload, options).await?;
    match response.result {
        Some(proto::server_response::Result::Query(result)) => Ok(result),
        None => Ok(proto::ExecuteQueryResult::default()),
        Some(_) => Err(ClientError::Decode(
            "data query response carried an unexpected payload".to_string(),
        )),
    }
}

fn decode_all(result: proto::ExecuteQueryResult) -> Result<Vec<ResultSet>, ClientError> {
    result
        .result_sets
        .into_iter()
        .map(|raw| decode(raw, None).map_err(ClientError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::{ConnectivityKind, ErrorKind};
    use crate::session::{PoolSettings, SessionPool};
    use crate::testing::{Fault, FakeDatabase, MemoryTransport};
    use crate::transaction::TransactionController;
    use crate::types::query_request::Params;

    struct Fixture {
        pool: SessionPool,
        database: Arc<FakeDatabase>,
        transport: Arc<MemoryTransport>,
        controller: TransactionController,
        executor: QueryExecutor,
    }

    fn fixture() -> Fixture {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let pool = SessionPool::new(
            Arc::clone(&transport) as Arc<dyn crate::transport::Transport>,
            PoolSettings {
                max_sessions: 2,
                acquire_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(1),
            },
        );
        Fixture {
            pool,
            database,
            transport,
            controller: TransactionController::default(),
            executor: QueryExecutor::new(),
        }
    }

    #[tokio::test]
    async fn test_select_one_buffered() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        let result = f
            .executor
            .execute_buffered(&mut session, &mut context, &"select 1;".into())
            .await
            .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.column_count(), 1);
        assert_eq!(result.row(0).unwrap().get_int32(0).unwrap(), 1);
        assert!(context.is_open());

        f.controller.commit(&mut session, &mut context).await.unwrap();
        assert!(context.committed());
    }

    #[tokio::test]
    async fn test_unbound_parameter_sends_nothing() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();
        let calls = f.transport.calls();

        let request = QueryRequest::with_params("select $a, $b;", Params::new().bind("a", 1i32));
        let error = f
            .executor
            .execute_buffered(&mut session, &mut context, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ClientError::ParameterBinding {
                missing: vec!["$b".to_string()]
            }
        );
        assert_eq!(f.transport.calls(), calls);
        assert!(context.is_open());
    }

    #[tokio::test]
    async fn test_bound_parameters_reach_the_server() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let request = QueryRequest::with_params(
            "select $id AS id, $name AS name;",
            Params::new().bind("id", 7i64).bind("name", "ada"),
        );

        let results = f
            .executor
            .execute_once(
                &mut session,
                TxMode::SerializableReadWrite,
                &request,
                CallOptions::new(),
            )
            .await
            .unwrap();
        let row = results[0].row(0).unwrap();
        assert_eq!(row.get_int64("id").unwrap(), 7);
        assert_eq!(row.get_text("name").unwrap(), "ada");
    }

    #[tokio::test]
    async fn test_execute_and_commit_in_one_round_trip() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();
        let calls = f.transport.calls();

        let results = f
            .executor
            .execute_and_commit(&mut session, &mut context, &"select 1;".into(), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(context.committed());
        assert!(!session.has_open_transaction());
        assert_eq!(f.transport.calls(), calls + 1);
        assert_eq!(f.database.committed_transactions(), 1);
        assert_eq!(f.database.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_execute_once_rejects_open_transaction() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let _context = f.controller.begin_default(&mut session).await.unwrap();

        let error = f
            .executor
            .execute_once(
                &mut session,
                TxMode::SerializableReadWrite,
                &"select 1;".into(),
                CallOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_statement_without_result_sets_is_empty() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        let result = f
            .executor
            .execute_buffered(&mut session, &mut context, &"upsert into t (a) values (1);".into())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.column_count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_keeps_transaction_open() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        let error = f
            .executor
            .execute_buffered(&mut session, &mut context, &"select from;".into())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(!error.issues().is_empty());
        assert!(context.is_open());
        assert!(!session.is_broken());
    }

    #[tokio::test]
    async fn test_aborted_transaction_rolls_back_context() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        f.transport.fail_next(
            "execute_data_query",
            Fault::Status(proto::StatusCode::Aborted, "locks invalidated".to_string()),
        );
        let error = f
            .executor
            .execute_buffered(&mut session, &mut context, &"select 1;".into())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(context.state(), TxState::RolledBack);
        assert!(!session.has_open_transaction());
    }

    #[tokio::test]
    async fn test_transport_failure_breaks_context_and_session() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        f.transport.fail_next(
            "execute_data_query",
            Fault::Connectivity(ConnectivityKind::Broken),
        );
        let error = f
            .executor
            .execute_buffered(&mut session, &mut context, &"select 1;".into())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connectivity);
        assert_eq!(context.state(), TxState::Broken);
        assert!(session.is_broken());
    }

    #[tokio::test]
    async fn test_stale_mode_runs_each_statement_alone() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f
            .controller
            .begin(&mut session, TxMode::StaleReadOnly)
            .await
            .unwrap();

        let result = f
            .executor
            .execute_buffered(&mut session, &mut context, &"select 5;".into())
            .await
            .unwrap();
        assert_eq!(result.row(0).unwrap().get_int32(0).unwrap(), 5);
        assert!(context.is_open());
        assert_eq!(f.database.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_before_scan() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let calls = f.transport.calls();

        let error = f
            .executor
            .execute_streaming(&mut session, &"  ".into(), ScanSettings::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidQuery);
        assert_eq!(f.transport.calls(), calls);
    }
}
