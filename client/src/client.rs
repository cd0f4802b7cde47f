//! The client facade: one value wiring configuration, transport, session
//! pool, transaction controller and query executor together.

use std::sync::Arc;

use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::query::{QueryExecutor, ScanSettings};
use crate::result::ResultSet;
use crate::session::{PoolSettings, PoolStats, PooledSession, SessionPool};
use crate::transaction::{TransactionContext, TransactionController, TxMode};
use crate::transport::{CallOptions, TcpSettings, TcpTransport, Transport};
use crate::types::query_request::QueryRequest;

/// Entry point for callers.
///
/// Cheap to clone; clones share the transport and the session pool.
#[derive(Clone)]
pub struct TableClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    pool: SessionPool,
    controller: TransactionController,
    executor: QueryExecutor,
}

impl TableClient {
    /// Build a client over TCP without touching the network.
    ///
    /// Connections open lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if `config` is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let settings = TcpSettings {
            connect_timeout: config.connect_timeout,
            ..TcpSettings::default()
        };
        let transport = Arc::new(TcpTransport::new(config.endpoint()?, settings));
        Self::with_transport(config, transport)
    }

    /// Build a client over TCP and verify the endpoint answers the handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if `config` is invalid
    /// - `Connectivity` if the endpoint is unreachable, rejects the handshake
    ///   or misses the connect deadline
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(config)?;
        let options = CallOptions::with_timeout(client.config.connect_timeout);
        client.transport.connect(options).await?;
        info!("Connected to {}", client.transport.endpoint());
        Ok(client)
    }

    /// Build a client from `TABULA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` on missing or invalid variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Build a client over any transport.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if `config` is invalid.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let pool = SessionPool::new(
            Arc::clone(&transport),
            PoolSettings::from_config(&config),
        );
        Ok(Self {
            controller: TransactionController::new(config.default_tx_mode),
            executor: QueryExecutor::new(),
            config,
            transport,
            pool,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn pool(&self) -> &SessionPool {
        &self.pool
    }

    #[must_use]
    pub const fn controller(&self) -> &TransactionController {
        &self.controller
    }

    #[must_use]
    pub const fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Borrow a session from the pool.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::acquire`].
    pub async fn session(&self) -> Result<PooledSession, ClientError> {
        self.pool.acquire().await
    }

    /// Borrow a session and begin a transaction on it.
    ///
    /// # Errors
    ///
    /// Pool errors from acquiring, transport and server errors from beginning.
    pub async fn begin(
        &self,
        mode: TxMode,
    ) -> Result<(PooledSession, TransactionContext), ClientError> {
        let mut session = self.pool.acquire().await?;
        let context = self.controller.begin(&mut session, mode).await?;
        Ok((session, context))
    }

    /// Run `request` in its own transaction in `mode`, committed in the same
    /// round trip, and return every result set.
    ///
    /// # Errors
    ///
    /// Pool errors, then see [`QueryExecutor::execute_once`].
    pub async fn execute_once(
        &self,
        mode: TxMode,
        request: &QueryRequest,
    ) -> Result<Vec<ResultSet>, ClientError> {
        request.validate()?;
        let mut session = self.pool.acquire().await?;
        self.executor
            .execute_once(&mut session, mode, request, CallOptions::new())
            .await
    }

    /// Like [`TableClient::execute_once`] in the default mode, keeping only
    /// the first result set.
    ///
    /// # Errors
    ///
    /// See [`TableClient::execute_once`].
    pub async fn query(&self, request: &QueryRequest) -> Result<ResultSet, ClientError> {
        let result_sets = self
            .execute_once(self.controller.default_mode(), request)
            .await?;
        Ok(result_sets.into_iter().next().unwrap_or_else(ResultSet::empty))
    }

    /// Scan `request` to the end and return every batch.
    ///
    /// # Errors
    ///
    /// Pool errors, then the scan's terminal failure; batches received before
    /// it are dropped.
    pub async fn scan_all(
        &self,
        request: &QueryRequest,
        settings: ScanSettings,
    ) -> Result<Vec<ResultSet>, ClientError> {
        request.validate()?;
        let mut session = self.pool.acquire().await?;
        let mut stream = self
            .executor
            .execute_streaming(&mut session, request, settings)
            .await?;
        stream.collect_batches().await
    }

    /// Delete every idle session and refuse further acquires.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Client for {} closed", self.transport.endpoint());
    }
}

impl std::fmt::Debug for TableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableClient")
            .field("endpoint", self.transport.endpoint())
            .field("pool", &self.pool.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{FakeDatabase, MemoryTransport};

    fn client() -> (TableClient, Arc<FakeDatabase>) {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let config = ClientConfig::new("localhost:2136", "/local");
        (TableClient::with_transport(config, transport).unwrap(), database)
    }

    #[tokio::test]
    async fn test_query_releases_its_session() {
        let (client, database) = client();
        let result = client.query(&"select 1;".into()).await.unwrap();
        assert_eq!(result.row(0).unwrap().get_int32(0).unwrap(), 1);

        let stats = client.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.busy, 0);
        assert_eq!(database.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(database));
        let mut config = ClientConfig::new("localhost:2136", "/local");
        config.max_sessions = 0;

        let error = TableClient::with_transport(config, transport).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_begin_hands_out_session_and_context() {
        let (client, _database) = client();
        let (mut session, mut context) = client.begin(TxMode::SnapshotReadOnly).await.unwrap();
        assert_eq!(context.session_id(), session.id());
        client
            .controller()
            .rollback(&mut session, &mut context)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_refuses_new_work() {
        let (client, database) = client();
        client.query(&"select 1;".into()).await.unwrap();
        client.close().await;

        assert_eq!(database.active_sessions(), 0);
        let error = client.query(&"select 1;".into()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }
}
