//! Transaction lifecycle per session.
//!
//! ```text
//! NoTx --begin--> Open --commit--> Committed --+
//!                   |                          |--> NoTx (session reusable)
//!                   +--rollback--> RolledBack -+
//! ```
//!
//! A transport failure during commit or rollback leaves the context `Broken`:
//! the outcome on the server is unknown and the session is discarded on
//! release.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::ClientError;
use crate::proto;
use crate::session::{OpenTransaction, PooledSession};
use crate::transport::CallOptions;

/// Identity source for transaction contexts.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Isolation of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Mutations become visible only after commit.
    #[default]
    SerializableReadWrite,
    /// Consistent read-only view as of begin.
    SnapshotReadOnly,
    /// Read-only, possibly stale; has no server transaction.
    StaleReadOnly,
}

impl TxMode {
    /// Whether begin/commit/rollback round-trip to the server.
    #[must_use]
    pub const fn has_server_transaction(self) -> bool {
        !matches!(self, Self::StaleReadOnly)
    }

    pub(crate) const fn to_proto(self) -> proto::TransactionMode {
        match self {
            Self::SerializableReadWrite => proto::TransactionMode::SerializableReadWrite,
            Self::SnapshotReadOnly => proto::TransactionMode::SnapshotReadOnly,
            Self::StaleReadOnly => proto::TransactionMode::StaleReadOnly,
        }
    }
}

impl std::fmt::Display for TxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializableReadWrite => write!(f, "serializable-rw"),
            Self::SnapshotReadOnly => write!(f, "snapshot-ro"),
            Self::StaleReadOnly => write!(f, "stale-ro"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
    /// Commit or rollback outcome unknown after a transport failure.
    Broken,
}

/// One transactional unit of work on one session.
///
/// # Invariants
///
/// - created `Open` by [`TransactionController::begin`]
/// - leaves `Open` exactly once
/// - `tx_id` is `None` only for [`TxMode::StaleReadOnly`]
#[derive(Debug)]
pub struct TransactionContext {
    id: u64,
    session_id: String,
    mode: TxMode,
    tx_id: Option<String>,
    state: TxState,
}

impl TransactionContext {
    #[must_use]
    pub const fn mode(&self) -> TxMode {
        self.mode
    }

    /// Server transaction id, `None` for local-only modes.
    #[must_use]
    pub fn tx_id(&self) -> Option<&str> {
        self.tx_id.as_deref()
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub const fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, TxState::Open)
    }

    #[must_use]
    pub const fn committed(&self) -> bool {
        matches!(self.state, TxState::Committed)
    }

    /// Fail unless this context is open and is the one open on `session`.
    pub(crate) fn ensure_open_on(&self, session: &PooledSession) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::InvalidState(format!(
                "transaction is already {}",
                self.state_name()
            )));
        }
        if session.id() != self.session_id {
            return Err(ClientError::InvalidState(format!(
                "transaction belongs to session {}, not {}",
                self.session_id,
                session.id()
            )));
        }
        match session.open_transaction() {
            Some(open) if open.context_id == self.id => Ok(()),
            _ => Err(ClientError::InvalidState(
                "transaction is no longer open on its session".to_string(),
            )),
        }
    }

    /// Move to a terminal state and detach from `session`.
    pub(crate) fn finish(&mut self, session: &mut PooledSession, state: TxState) {
        debug!(
            "Transaction {} on session {} finished as {state:?}",
            self.tx_id.as_deref().unwrap_or("<local>"),
            self.session_id
        );
        self.state = state;
        session.session_mut().set_open_transaction(None);
    }

    const fn state_name(&self) -> &'static str {
        match self.state {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
            TxState::Broken => "broken",
        }
    }
}

/// Begins, commits and rolls back transactions on pooled sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionController {
    default_mode: TxMode,
}

impl TransactionController {
    #[must_use]
    pub const fn new(default_mode: TxMode) -> Self {
        Self { default_mode }
    }

    #[must_use]
    pub const fn default_mode(&self) -> TxMode {
        self.default_mode
    }

    /// Begin a transaction in `mode` on `session`.
    ///
    /// # Errors
    ///
    /// See [`TransactionController::begin_with`].
    pub async fn begin(
        &self,
        session: &mut PooledSession,
        mode: TxMode,
    ) -> Result<TransactionContext, ClientError> {
        self.begin_with(session, mode, CallOptions::new()).await
    }

    /// Begin a transaction under `options`.
    ///
    /// # Pre-conditions
    ///
    /// - no transaction is open on `session`
    ///
    /// # Errors
    ///
    /// - `InvalidState` if a transaction is already open (no request is sent)
    /// - transport and server errors from the begin request
    pub async fn begin_with(
        &self,
        session: &mut PooledSession,
        mode: TxMode,
        options: CallOptions,
    ) -> Result<TransactionContext, ClientError> {
        if session.has_open_transaction() {
            return Err(ClientError::InvalidState(format!(
                "session {} already has an open transaction",
                session.id()
            )));
        }

        let session_id = session.id().to_owned();
        let tx_id = if mode.has_server_transaction() {
            let payload =
                proto::client_request::Payload::BeginTransaction(proto::BeginTransactionRequest {
                    session_id: session_id.as_str().to_owned(),
                    mode: mode.to_proto().into(),
                });
            let response = session.call(payload, options).await?;
            match response.result {
                Some(proto::server_response::Result::Transaction(result))
                    if !result.tx_id.is_empty() =>
                {
                    Some(result.tx_id)
                }
                _ => {
                    return Err(ClientError::Decode(
                        "begin response carried no transaction id".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let context = TransactionContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            session_id,
            mode,
            tx_id,
            state: TxState::Open,
        };
        session.session_mut().set_open_transaction(Some(OpenTransaction {
            context_id: context.id,
            tx_id: context.tx_id.as_deref().map(str::to_owned),
        }));
        debug!(
            "Began {mode} transaction {} on session {}",
            context.tx_id.as_deref().unwrap_or("<local>"),
            context.session_id
        );
        Ok(context)
    }

    /// Begin a transaction in the controller's default mode.
    ///
    /// # Errors
    ///
    /// See [`TransactionController::begin_with`].
    pub async fn begin_default(
        &self,
        session: &mut PooledSession,
    ) -> Result<TransactionContext, ClientError> {
        self.begin(session, self.default_mode).await
    }

    /// Commit `context`.
    ///
    /// # Errors
    ///
    /// See [`TransactionController::commit_with`].
    pub async fn commit(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
    ) -> Result<(), ClientError> {
        self.commit_with(session, context, CallOptions::new()).await
    }

    /// Commit `context` under `options`.
    ///
    /// # Post-conditions
    ///
    /// - on success the context is `Committed`
    /// - if the server rejects the commit the context is `RolledBack`
    /// - if the transport fails the context is `Broken`
    /// - in every case the session no longer has an open transaction
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the context is not open on `session` (no request is sent)
    /// - transport and server errors from the commit request
    pub async fn commit_with(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        options: CallOptions,
    ) -> Result<(), ClientError> {
        self.finish_with(session, context, options, Outcome::Commit)
            .await
    }

    /// Roll back `context`.
    ///
    /// # Errors
    ///
    /// See [`TransactionController::rollback_with`].
    pub async fn rollback(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
    ) -> Result<(), ClientError> {
        self.rollback_with(session, context, CallOptions::new()).await
    }

    /// Roll back `context` under `options`.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionController::commit_with`]; a rejected rollback
    /// still leaves the context `RolledBack`.
    pub async fn rollback_with(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        options: CallOptions,
    ) -> Result<(), ClientError> {
        self.finish_with(session, context, options, Outcome::Rollback)
            .await
    }

    async fn finish_with(
        &self,
        session: &mut PooledSession,
        context: &mut TransactionContext,
        options: CallOptions,
        outcome: Outcome,
    ) -> Result<(), ClientError> {
        context.ensure_open_on(session)?;

        let success_state = match outcome {
            Outcome::Commit => TxState::Committed,
            Outcome::Rollback => TxState::RolledBack,
        };
        let Some(tx_id) = context.tx_id.as_deref().map(str::to_owned) else {
            context.finish(session, success_state);
            return Ok(());
        };

        let session_id = session.id().to_owned();
        let payload = match outcome {
            Outcome::Commit => {
                proto::client_request::Payload::CommitTransaction(proto::CommitTransactionRequest {
                    session_id,
                    tx_id,
                })
            }
            Outcome::Rollback => proto::client_request::Payload::RollbackTransaction(
                proto::RollbackTransactionRequest { session_id, tx_id },
            ),
        };

        match session.call(payload, options).await {
            Ok(_) => {
                context.finish(session, success_state);
                Ok(())
            }
            Err(e @ ClientError::Execution { .. }) => {
                context.finish(session, TxState::RolledBack);
                Err(e)
            }
            Err(e) => {
                context.finish(session, TxState::Broken);
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::{ConnectivityKind, ErrorKind};
    use crate::session::{PoolSettings, SessionPool};
    use crate::testing::{Fault, FakeDatabase, MemoryTransport};

    struct Fixture {
        pool: SessionPool,
        database: Arc<FakeDatabase>,
        transport: Arc<MemoryTransport>,
        controller: TransactionController,
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
        }
    }

    #[tokio::test]
    async fn test_begin_commit_begin_again() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();

        let mut first = f
            .controller
            .begin(&mut session, TxMode::SerializableReadWrite)
            .await
            .unwrap();
        assert!(first.is_open());
        assert!(first.tx_id().is_some());
        assert!(session.has_open_transaction());

        f.controller.commit(&mut session, &mut first).await.unwrap();
        assert!(first.committed());
        assert!(!session.has_open_transaction());

        let second = f
            .controller
            .begin(&mut session, TxMode::SerializableReadWrite)
            .await
            .unwrap();
        assert_ne!(first.tx_id(), second.tx_id());
        assert_eq!(f.database.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn test_double_commit_is_invalid_state_without_io() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();
        f.controller.commit(&mut session, &mut context).await.unwrap();

        let calls = f.transport.calls();
        let error = f
            .controller
            .commit(&mut session, &mut context)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
        assert_eq!(f.transport.calls(), calls);

        let error = f
            .controller
            .rollback(&mut session, &mut context)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_begin_twice_is_invalid_state() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let _context = f.controller.begin_default(&mut session).await.unwrap();

        let calls = f.transport.calls();
        let error = f
            .controller
            .begin(&mut session, TxMode::SnapshotReadOnly)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
        assert_eq!(f.transport.calls(), calls);
    }

    #[tokio::test]
    async fn test_rollback_closes_context() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f
            .controller
            .begin(&mut session, TxMode::SnapshotReadOnly)
            .await
            .unwrap();
        f.controller
            .rollback(&mut session, &mut context)
            .await
            .unwrap();
        assert_eq!(context.state(), TxState::RolledBack);
        assert!(!context.committed());
        assert_eq!(f.database.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_stale_mode_is_local() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let calls = f.transport.calls();

        let mut context = f
            .controller
            .begin(&mut session, TxMode::StaleReadOnly)
            .await
            .unwrap();
        assert!(context.tx_id().is_none());
        f.controller.commit(&mut session, &mut context).await.unwrap();
        assert!(context.committed());
        assert_eq!(f.transport.calls(), calls);
    }

    #[tokio::test]
    async fn test_context_from_other_session_is_rejected() {
        let f = fixture();
        let mut first = f.pool.acquire().await.unwrap();
        let mut second = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut first).await.unwrap();

        let error = f
            .controller
            .commit(&mut second, &mut context)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
        assert!(context.is_open());
    }

    #[tokio::test]
    async fn test_server_rejected_commit_rolls_back() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        f.transport.fail_next(
            "commit_transaction",
            Fault::Status(proto::StatusCode::Aborted, "transaction locks invalidated".to_string()),
        );
        let error = f
            .controller
            .commit(&mut session, &mut context)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(!error.issues().is_empty());
        assert_eq!(context.state(), TxState::RolledBack);
        assert!(!session.has_open_transaction());
        assert!(!session.is_broken());
    }

    #[tokio::test]
    async fn test_transport_failure_during_commit_breaks_context() {
        let f = fixture();
        let mut session = f.pool.acquire().await.unwrap();
        let mut context = f.controller.begin_default(&mut session).await.unwrap();

        f.transport.fail_next(
            "commit_transaction",
            Fault::Connectivity(ConnectivityKind::Broken),
        );
        let error = f
            .controller
            .commit(&mut session, &mut context)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connectivity);
        assert_eq!(context.state(), TxState::Broken);
        assert!(session.is_broken());
    }
}
