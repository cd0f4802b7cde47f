//! Server-side sessions and the pool that lends them out.
//!
//! A [`Session`] is the client's record of one server session: its id, its
//! lifecycle state, and the bookkeeping the pool needs to decide whether the
//! session can be reused when a caller hands it back.

mod pool;

use tracing::{debug, warn};

pub use pool::{PoolSettings, PoolStats, PooledSession, SessionPool};

use crate::error::ClientError;
use crate::proto;
use crate::transport::{CallOptions, ResponseStream, Transport, envelope};
use crate::types::issue::issues_from_proto;

/// Lifecycle of a session as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Parked in the pool, free to lend.
    Idle,
    /// Lent to exactly one caller.
    Busy,
    /// Discarded or deleted; never lent again.
    #[default]
    Closed,
}

/// Server transaction currently open on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenTransaction {
    /// Identity of the `TransactionContext` that owns it.
    pub context_id: u64,
    /// Server transaction id; `None` for local-only modes.
    pub tx_id: Option<String>,
}

/// One server session.
///
/// # Invariants
///
/// - at most one open transaction at a time
/// - `in_flight` is set for the whole duration of a request or stream; a
///   session found with it set was abandoned mid-request
/// - once `broken` is set it is never cleared
#[derive(Debug, Default)]
pub struct Session {
    id: String,
    state: SessionState,
    open_transaction: Option<OpenTransaction>,
    in_flight: bool,
    broken: bool,
    use_count: u64,
}

impl Session {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a failure left this session unusable; it will be discarded on release.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    #[must_use]
    pub const fn has_open_transaction(&self) -> bool {
        self.open_transaction.is_some()
    }

    /// Requests sent on this session so far.
    #[must_use]
    pub const fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) const fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) const fn open_transaction(&self) -> Option<&OpenTransaction> {
        self.open_transaction.as_ref()
    }

    pub(crate) fn set_open_transaction(&mut self, open: Option<OpenTransaction>) {
        self.open_transaction = open;
    }

    /// Mark the session unusable.
    pub(crate) fn mark_broken(&mut self, reason: &dyn std::fmt::Display) {
        if !self.broken {
            warn!("Session {} marked broken: {reason}", self.id);
        }
        self.broken = true;
    }

    /// Record `error` against the session and hand it back.
    pub(crate) fn fail(&mut self, error: ClientError) -> ClientError {
        if error.poisons_session() {
            self.mark_broken(&error);
        }
        error
    }

    fn start_request(&mut self) {
        if self.in_flight {
            self.mark_broken(&"previous request was abandoned");
        }
        self.in_flight = true;
        self.use_count += 1;
    }

    /// Close out a stream started with [`Session::open_stream`].
    pub(crate) const fn finish_stream(&mut self) {
        self.in_flight = false;
    }

    /// Split a response into its payload or an `Execution` error.
    ///
    /// A `BadSession` status marks the session broken.
    pub(crate) fn check_status(
        &mut self,
        response: proto::ServerResponse,
    ) -> Result<proto::ServerResponse, ClientError> {
        match response.status_code() {
            proto::StatusCode::Success => Ok(response),
            status => Err(self.fail(ClientError::Execution {
                status,
                issues: issues_from_proto(response.issues),
            })),
        }
    }

    /// Send one request on this session and wait for its response.
    ///
    /// # Errors
    ///
    /// Transport failures come back unchanged (and mark the session broken);
    /// a non-success status becomes `ClientError::Execution`.
    pub(crate) async fn call(
        &mut self,
        transport: &dyn Transport,
        payload: proto::client_request::Payload,
        options: CallOptions,
    ) -> Result<proto::ServerResponse, ClientError> {
        let request = envelope(payload, &options);
        debug!("Session {} sending request {}", self.id, request.request_id);
        self.start_request();
        let result = transport.send(request, options).await;
        self.in_flight = false;

        let response = result.map_err(|e| self.fail(e.into()))?;
        self.check_status(response)
    }

    /// Open a response stream on this session.
    ///
    /// The session stays in flight until the consumer calls
    /// [`Session::finish_stream`]; a stream dropped early leaves it marked.
    pub(crate) async fn open_stream(
        &mut self,
        transport: &dyn Transport,
        payload: proto::client_request::Payload,
        options: CallOptions,
    ) -> Result<ResponseStream, ClientError> {
        let request = envelope(payload, &options);
        debug!("Session {} opening stream {}", self.id, request.request_id);
        self.start_request();
        match transport.open_stream(request, options).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.in_flight = false;
                Err(self.fail(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectivityKind;
    use crate::proto::StatusCode;

    #[test]
    fn test_new_session_is_idle_and_healthy() {
        let session = Session::new("s-1".to_string());
        assert_eq!(session.id(), "s-1");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_broken());
        assert!(!session.has_open_transaction());
    }

    #[test]
    fn test_fail_marks_broken_only_for_poisoning_errors() {
        let mut session = Session::new("s-1".to_string());
        let _ = session.fail(ClientError::InvalidQuery("empty".to_string()));
        assert!(!session.is_broken());

        let _ = session.fail(ClientError::Connectivity {
            kind: ConnectivityKind::Broken,
            message: "reset".to_string(),
        });
        assert!(session.is_broken());
    }

    #[test]
    fn test_bad_session_status_marks_broken() {
        let mut session = Session::new("s-1".to_string());
        let response = proto::ServerResponse::failure(1, StatusCode::BadSession, "unknown session");
        let error = session.check_status(response).unwrap_err();
        assert_eq!(error.issues().len(), 1);
        assert!(session.is_broken());
    }

    #[test]
    fn test_abandoned_request_is_detected_on_next_start() {
        let mut session = Session::new("s-1".to_string());
        session.start_request();
        assert!(session.is_in_flight());
        session.start_request();
        assert!(session.is_broken());
        assert_eq!(session.use_count(), 2);
    }
}
