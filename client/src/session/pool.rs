//! Bounded pool of server sessions.
//!
//! # Capacity
//!
//! A semaphore with `max_sessions` permits gates every lent session and every
//! session under construction. The free list and the open-session counter
//! live behind one mutex; `acquire` and check-in update them atomically, so
//! the number of open sessions never exceeds `max_sessions`. A slot taken
//! for a session under construction is given back if the creating future
//! is dropped.
//!
//! # Check-in
//!
//! A [`PooledSession`] returns itself on drop. A healthy session goes back to
//! the free list. A session is discarded instead when:
//!
//! - it was abandoned mid-request (a future was dropped or a scan was not
//!   drained), or a failure marked it broken; a replacement is then created
//!   in the background if capacity allows
//! - it still holds an open transaction (a leak, logged at `warn`)
//! - the pool is closed
//!
//! The session is checked in before its permit is released, so a waiter
//! woken by the permit finds the session on the free list.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Session, SessionState};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::proto;
use crate::transport::{CallOptions, Interrupted, ResponseStream, Transport, envelope};
use crate::types::issue::issues_from_proto;

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Ceiling on open sessions.
    pub max_sessions: usize,
    /// How long `acquire` waits when every session is busy.
    pub acquire_timeout: Duration,
    /// Deadline applied to each request made on a pooled session.
    pub request_timeout: Duration,
}

impl PoolSettings {
    #[must_use]
    pub const fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            acquire_timeout: config.session_acquire_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: ClientConfig::DEFAULT_MAX_SESSIONS,
            acquire_timeout: ClientConfig::DEFAULT_SESSION_ACQUIRE_TIMEOUT,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub max_sessions: usize,
    /// Sessions that exist: idle, lent out, or being created.
    pub open: usize,
    pub idle: usize,
    /// Sessions lent to callers.
    pub busy: usize,
    /// Sessions being created, for a caller or as a background replacement.
    pub creating: usize,
    /// Sessions created over the pool's lifetime.
    pub created: u64,
    /// Sessions discarded over the pool's lifetime.
    pub discarded: u64,
}

/// Why a returned session is not reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discard {
    Abandoned,
    Broken,
    LeakedTransaction,
    PoolClosed,
}

impl Discard {
    const fn wants_replacement(self) -> bool {
        matches!(self, Self::Abandoned | Self::Broken)
    }
}

impl std::fmt::Display for Discard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abandoned => write!(f, "abandoned mid-request"),
            Self::Broken => write!(f, "broken by a failed request"),
            Self::LeakedTransaction => write!(f, "released with an open transaction"),
            Self::PoolClosed => write!(f, "pool closed"),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<Session>,
    /// Includes `creating`.
    open: usize,
    creating: usize,
    closed: bool,
}

impl PoolState {
    /// Count a session about to be created. Pair with a [`SlotReservation`].
    const fn reserve(&mut self) {
        self.open += 1;
        self.creating += 1;
    }
}

/// A slot counted by [`PoolState::reserve`] while its session is created.
///
/// Dropped unfilled (creation failed, or the creating future was dropped),
/// it gives the slot back.
struct SlotReservation<'a> {
    pool: &'a PoolInner,
    filled: bool,
}

impl<'a> SlotReservation<'a> {
    const fn new(pool: &'a PoolInner) -> Self {
        Self {
            pool,
            filled: false,
        }
    }

    /// The session exists; it now counts as idle or lent instead.
    fn fill(mut self) {
        self.filled = true;
        if let Ok(mut state) = self.pool.state.lock() {
            state.creating = state.creating.saturating_sub(1);
        }
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        if let Ok(mut state) = self.pool.state.lock() {
            state.open = state.open.saturating_sub(1);
            state.creating = state.creating.saturating_sub(1);
        }
        debug!("Released a session slot whose creation did not finish");
    }
}

struct PoolInner {
    transport: Arc<dyn Transport>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    created: AtomicU64,
    discarded: AtomicU64,
}

/// Lends sessions to callers, one caller per session.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                transport,
                settings,
                permits: Arc::new(Semaphore::new(settings.max_sessions)),
                state: Mutex::new(PoolState::default()),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        self.inner.settings
    }

    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Borrow a session, waiting up to the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::acquire_with`].
    pub async fn acquire(&self) -> Result<PooledSession, ClientError> {
        self.acquire_with(CallOptions::new()).await
    }

    /// Borrow a session under `options`; without a deadline the configured
    /// acquire timeout applies.
    ///
    /// # Post-conditions
    ///
    /// - the returned session is `Busy` and held by no other caller
    /// - open sessions never exceed `max_sessions`
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if every session stayed busy until the deadline
    /// - `Cancelled` if the token fired while waiting
    /// - `InvalidState` if the pool is closed
    /// - any transport or server error from creating a new session
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub async fn acquire_with(&self, options: CallOptions) -> Result<PooledSession, ClientError> {
        let options = options.or_timeout(self.inner.settings.acquire_timeout);
        let started = Instant::now();

        let permit = match options
            .run(Arc::clone(&self.inner.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(pool_closed()),
            Err(Interrupted::Deadline) => {
                debug!(
                    "Session acquire gave up after {}ms",
                    started.elapsed().as_millis()
                );
                return Err(ClientError::PoolExhausted {
                    max_sessions: self.inner.settings.max_sessions,
                    waited: started.elapsed(),
                });
            }
            Err(Interrupted::Cancelled) => {
                return Err(ClientError::Cancelled {
                    operation: "acquire_session",
                });
            }
        };

        {
            let mut state = self.inner.lock_state()?;
            if state.closed {
                return Err(pool_closed());
            }
            if let Some(session) = state.idle.pop_back() {
                drop(state);
                debug!("Lending idle session {}", session.id());
                return Ok(self.inner.lend(session, permit));
            }
            if state.open >= self.inner.settings.max_sessions {
                return Err(ClientError::InvalidState(format!(
                    "pool holds a permit but {} sessions are already open",
                    state.open
                )));
            }
            state.reserve();
        }

        // Dropping this future mid-creation gives the slot back.
        let reservation = SlotReservation::new(&self.inner);
        let session = self.inner.create_session(options).await?;
        reservation.fill();
        debug!("Lending new session {}", session.id());
        Ok(self.inner.lend(session, permit))
    }

    /// Hand a session back. Equivalent to dropping it.
    pub fn release(&self, session: PooledSession) {
        drop(session);
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (open, idle, creating) = self
            .inner
            .state
            .lock()
            .map_or((0, 0, 0), |state| {
                (state.open, state.idle.len(), state.creating)
            });
        PoolStats {
            max_sessions: self.inner.settings.max_sessions,
            open,
            idle,
            busy: open.saturating_sub(idle).saturating_sub(creating),
            creating,
            created: self.inner.created.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop lending, fail pending and future `acquire` calls, and delete
    /// every idle session on the server. Lent sessions are deleted when
    /// they come back.
    pub async fn close(&self) {
        let drained: Vec<Session> = match self.inner.state.lock() {
            Ok(mut state) => {
                state.closed = true;
                let drained: Vec<Session> = state.idle.drain(..).collect();
                state.open = state.open.saturating_sub(drained.len());
                drained
            }
            Err(_) => Vec::new(),
        };
        self.inner.permits.close();

        let count = drained.len();
        for mut session in drained {
            session.set_state(SessionState::Closed);
            if let Err(e) = self.inner.delete_session(session.id()).await {
                debug!("Could not delete session {} on close: {e}", session.id());
            }
        }
        info!("Session pool closed, deleted {count} idle session(s)");
    }
}

fn pool_closed() -> ClientError {
    ClientError::InvalidState("session pool is closed".to_string())
}

impl PoolInner {
    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, PoolState>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::InvalidState("session pool lock poisoned".to_string()))
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn lend(self: &Arc<Self>, mut session: Session, permit: OwnedSemaphorePermit) -> PooledSession {
        session.set_state(SessionState::Busy);
        PooledSession {
            session,
            pool: Arc::clone(self),
            _permit: permit,
        }
    }


    async fn create_session(&self, options: CallOptions) -> Result<Session, ClientError> {
        let request = envelope(
            proto::client_request::Payload::CreateSession(proto::CreateSessionRequest {}),
            &options,
        );
        let response = self.transport.send(request, options).await?;

        let status = response.status_code();
        if status != proto::StatusCode::Success {
            return Err(ClientError::Execution {
                status,
                issues: issues_from_proto(response.issues),
            });
        }
        match response.result {
            Some(proto::server_response::Result::Session(result))
                if !result.session_id.is_empty() =>
            {
                self.created.fetch_add(1, Ordering::Relaxed);
                info!("Created session {}", result.session_id);
                Ok(Session::new(result.session_id))
            }
            _ => Err(ClientError::Decode(
                "create session response carried no session id".to_string(),
            )),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let options = CallOptions::with_timeout(self.settings.request_timeout);
        let request = envelope(
            proto::client_request::Payload::DeleteSession(proto::DeleteSessionRequest {
                session_id: session_id.to_owned(),
            }),
            &options,
        );
        let response = self.transport.send(request, options).await?;
        match response.status_code() {
            proto::StatusCode::Success => Ok(()),
            status => Err(ClientError::Execution {
                status,
                issues: issues_from_proto(response.issues),
            }),
        }
    }

    /// Return a session from a caller.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn check_in(self: &Arc<Self>, mut session: Session) {
        let mut discard = if session.is_in_flight() {
            Some(Discard::Abandoned)
        } else if session.is_broken() {
            Some(Discard::Broken)
        } else if session.has_open_transaction() {
            warn!(
                "Session {} released with an open transaction; discarding it",
                session.id()
            );
            Some(Discard::LeakedTransaction)
        } else {
            None
        };

        let pool_closed = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed && discard.is_none() {
                discard = Some(Discard::PoolClosed);
            }
            if discard.is_none() {
                session.set_state(SessionState::Idle);
                state.idle.push_back(session);
                return;
            }
            state.open = state.open.saturating_sub(1);
            state.closed
        };

        let Some(reason) = discard else {
            return;
        };
        session.set_state(SessionState::Closed);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        info!("Discarding session {}: {reason}", session.id());

        // Only spawn if we're inside a tokio runtime (drop may run outside one)
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let pool = Arc::clone(self);
        let session_id = session.id().to_owned();
        tokio::spawn(async move {
            if let Err(e) = pool.delete_session(&session_id).await {
                debug!("Could not delete discarded session {session_id}: {e}");
            }
        });
        if reason.wants_replacement() && !pool_closed {
            self.spawn_replacement();
        }
    }

    /// Create one session in the background and park it on the free list.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn spawn_replacement(self: &Arc<Self>) {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!("No capacity for a replacement session");
            return;
        };
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed || state.open >= self.settings.max_sessions {
                return;
            }
            state.reserve();
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let options = CallOptions::with_timeout(pool.settings.request_timeout);
            let reservation = SlotReservation::new(&pool);
            match pool.create_session(options).await {
                Ok(session) => {
                    reservation.fill();
                    info!("Replacement session {} ready", session.id());
                    pool.check_in(session);
                }
                Err(e) => {
                    drop(reservation);
                    warn!("Could not create a replacement session: {e}");
                }
            }
            drop(permit);
        });
    }
}

/// A session lent to one caller; returns to the pool on drop.
pub struct PooledSession {
    session: Session,
    pool: Arc<PoolInner>,
    // Dropped after `Drop::drop` has checked the session in.
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub(crate) const fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Send one request on this session under the pool's request timeout.
    pub(crate) async fn call(
        &mut self,
        payload: proto::client_request::Payload,
        options: CallOptions,
    ) -> Result<proto::ServerResponse, ClientError> {
        let options = options.or_timeout(self.pool.settings.request_timeout);
        self.session
            .call(self.pool.transport.as_ref(), payload, options)
            .await
    }

    /// Open a response stream on this session under the pool's request timeout.
    pub(crate) async fn open_stream(
        &mut self,
        payload: proto::client_request::Payload,
        options: CallOptions,
    ) -> Result<ResponseStream, ClientError> {
        let options = options.or_timeout(self.pool.settings.request_timeout);
        self.session
            .open_stream(self.pool.transport.as_ref(), payload, options)
            .await
    }

    /// Hand the session back to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let session = std::mem::take(&mut self.session);
        self.pool.check_in(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::OpenTransaction;
    use crate::testing::{FakeDatabase, MemoryTransport};

    fn pool_with(max_sessions: usize, acquire_timeout: Duration) -> (SessionPool, Arc<FakeDatabase>) {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let pool = SessionPool::new(
            transport,
            PoolSettings {
                max_sessions,
                acquire_timeout,
                request_timeout: Duration::from_secs(5),
            },
        );
        (pool, database)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_acquire_creates_lazily() {
        let (pool, database) = pool_with(4, Duration::from_secs(1));
        assert_eq!(pool.stats().open, 0);

        let session = pool.acquire().await.unwrap();
        assert_eq!(session.state(), SessionState::Busy);
        assert_eq!(database.active_sessions(), 1);

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_acquire_release_round_trip() {
        let (pool, _database) = pool_with(4, Duration::from_secs(1));
        pool.release(pool.acquire().await.unwrap());
        let before = pool.stats();

        for _ in 0..10 {
            let session = pool.acquire().await.unwrap();
            pool.release(session);
            assert_eq!(pool.stats(), before);
        }
        assert_eq!(before.open, 1);
        assert_eq!(before.idle, 1);
        assert_eq!(before.created, 1);
    }

    #[tokio::test]
    async fn test_released_session_is_reused() {
        let (pool, _database) = pool_with(4, Duration::from_secs(1));
        let first = pool.acquire().await.unwrap();
        let id = first.id().to_owned();
        first.release();

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id(), id);
        assert_eq!(second.state(), SessionState::Busy);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (pool, _database) = pool_with(2, Duration::from_millis(50));
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let error = pool.acquire().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PoolExhausted);
        assert!(matches!(error, ClientError::PoolExhausted { max_sessions: 2, .. }));
        assert_eq!(pool.stats().open, 2);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_session() {
        let (pool, _database) = pool_with(1, Duration::from_secs(2));
        let held = pool.acquire().await.unwrap();
        let id = held.id().to_owned();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|s| s.id().to_owned()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release();

        assert_eq!(waiter.await.unwrap().unwrap(), id);
        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let (pool, _database) = pool_with(1, Duration::from_secs(5));
        let _held = pool.acquire().await.unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let error = pool
            .acquire_with(CallOptions::new().cancelled_by(token))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_acquire_during_creation_frees_its_slot() {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let pool = SessionPool::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            PoolSettings {
                max_sessions: 1,
                acquire_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(5),
            },
        );
        transport.set_delay(Some(Duration::from_millis(200)));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(abandoned.is_err());
        let stats = pool.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.creating, 0);
        assert_eq!(stats.busy, 0);

        transport.set_delay(None);
        let session = pool.acquire().await.unwrap();
        assert_eq!(session.state(), SessionState::Busy);
        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test]
    async fn test_session_under_construction_is_not_busy() {
        let database = Arc::new(FakeDatabase::new("/local"));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let pool = SessionPool::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            PoolSettings {
                max_sessions: 2,
                acquire_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(5),
            },
        );
        transport.set_delay(Some(Duration::from_millis(100)));

        let pending = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|s| s.id().to_owned()) })
        };
        wait_until(|| pool.stats().creating == 1).await;
        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.busy, 0);

        pending.await.unwrap().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.creating, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_broken_session_is_replaced() {
        let (pool, database) = pool_with(2, Duration::from_secs(1));
        let mut session = pool.acquire().await.unwrap();
        let broken_id = session.id().to_owned();
        session.session_mut().mark_broken(&"test");
        session.release();

        assert_eq!(pool.stats().discarded, 1);
        wait_until(|| pool.stats().idle == 1).await;

        wait_until(|| !database.has_session(&broken_id)).await;
        let replacement = pool.acquire().await.unwrap();
        assert_ne!(replacement.id(), broken_id);
        assert!(pool.stats().open <= 2);
    }

    #[tokio::test]
    async fn test_leaked_transaction_discards_session() {
        let (pool, database) = pool_with(2, Duration::from_secs(1));
        let mut session = pool.acquire().await.unwrap();
        session.session_mut().set_open_transaction(Some(OpenTransaction {
            context_id: 1,
            tx_id: Some("tx".to_string()),
        }));
        session.release();

        let stats = pool.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
        wait_until(|| database.active_sessions() == 0).await;
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails() {
        let (pool, database) = pool_with(2, Duration::from_secs(1));
        pool.release(pool.acquire().await.unwrap());
        pool.close().await;

        assert_eq!(database.active_sessions(), 0);
        let error = pool.acquire().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_ceiling_never_exceeded_under_contention() {
        let (pool, database) = pool_with(3, Duration::from_millis(100));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let session = pool.acquire().await?;
                assert!(pool.stats().open <= 3);
                tokio::time::sleep(Duration::from_millis(10)).await;
                session.release();
                Ok::<_, ClientError>(())
            }));
        }
        for task in tasks {
            let result = task.await.unwrap();
            if let Err(e) = result {
                assert_eq!(e.kind(), ErrorKind::PoolExhausted);
            }
        }
        assert!(pool.stats().open <= 3);
        assert!(database.active_sessions() <= 3);
    }
}
