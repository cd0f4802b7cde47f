//! Transport binding between the client core and a database endpoint.
//!
//! A transport moves [`proto::ClientRequest`] envelopes to the endpoint and
//! brings back [`proto::ServerResponse`]s, either one (unary) or a lazy
//! sequence (streaming). It never retries: every failure is classified and
//! returned so the caller's policy can decide.
//!
//! # Failure classification
//!
//! - connect phase: [`ConnectivityKind::Unreachable`], [`ConnectivityKind::Handshake`],
//!   [`ConnectivityKind::DeadlineExceeded`]
//! - request phase: [`TransportError::Timeout`] on deadline,
//!   [`ConnectivityKind::Broken`] when the channel fails mid-call
//! - either phase: [`TransportError::Cancelled`] when the caller's token fires

mod frame;
mod tcp;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ConnectivityKind};
use crate::proto;
use crate::types::endpoint::Endpoint;

pub use frame::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use tcp::{TcpSettings, TcpTransport};

/// Lazy sequence of responses produced by a streaming call.
pub type ResponseStream = BoxStream<'static, Result<proto::ServerResponse, TransportError>>;

/// The seam between the client core and the wire.
///
/// Implementations own their connections. `send` and `open_stream` may be
/// called concurrently from many tasks.
pub trait Transport: Send + Sync {
    /// The endpoint this transport talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Open (or verify) a channel to the endpoint ahead of the first request.
    fn connect(&self, options: CallOptions) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Send one request and wait for its single response.
    fn send(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<proto::ServerResponse, TransportError>>;

    /// Send one request whose responses arrive as a stream.
    ///
    /// The stream ends after the response with `end_of_stream` set or a
    /// non-success status. The deadline and token in `options` also govern
    /// every read from the stream.
    fn open_stream(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<ResponseStream, TransportError>>;
}

/// Deadline and cancellation for one suspending call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Keep the deadline, observe `cancel`.
    #[must_use]
    pub fn cancelled_by(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fill in a deadline `timeout` from now if none is set.
    #[must_use]
    pub fn or_timeout(mut self, timeout: Duration) -> Self {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + timeout);
        }
        self
    }

    /// Time left before the deadline, if any.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Run `future` under these options.
    ///
    /// Returns `Err(Interrupted::Deadline)` or `Err(Interrupted::Cancelled)`
    /// when the future did not finish first; the future is dropped.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            output = future => Ok(output),
            () = deadline => Err(Interrupted::Deadline),
        }
    }
}

/// Why [`CallOptions::run`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Deadline,
    Cancelled,
}

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A channel could not be opened or failed mid-call.
    Connectivity {
        kind: ConnectivityKind,
        message: String,
    },
    /// A request ran past its deadline.
    Timeout { operation: &'static str },
    /// The caller's cancellation token fired.
    Cancelled { operation: &'static str },
}

impl TransportError {
    pub(crate) fn connectivity(kind: ConnectivityKind, message: impl Into<String>) -> Self {
        Self::Connectivity {
            kind,
            message: message.into(),
        }
    }

    /// Map an interrupted request-phase wait.
    pub(crate) const fn interrupted(interrupted: Interrupted, operation: &'static str) -> Self {
        match interrupted {
            Interrupted::Deadline => Self::Timeout { operation },
            Interrupted::Cancelled => Self::Cancelled { operation },
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity { kind, message } => write!(f, "{kind}: {message}"),
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
            Self::Cancelled { operation } => write!(f, "{operation} was cancelled"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Connectivity { kind, message } => Self::Connectivity { kind, message },
            TransportError::Timeout { operation } => Self::Timeout { operation },
            TransportError::Cancelled { operation } => Self::Cancelled { operation },
        }
    }
}

/// Process-wide request id source; ids are unique per client process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Wrap `payload` in an envelope with a fresh request id and the time left
/// before `options`' deadline.
#[must_use]
pub fn envelope(payload: proto::client_request::Payload, options: &CallOptions) -> proto::ClientRequest {
    let operation_timeout = options
        .remaining()
        .and_then(|remaining| prost_types::Duration::try_from(remaining).ok());
    proto::ClientRequest {
        request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        operation_timeout,
        payload: Some(payload),
    }
}

/// Short name of the request's operation, used in timeout and cancel errors.
#[must_use]
pub const fn operation_name(request: &proto::ClientRequest) -> &'static str {
    use proto::client_request::Payload;
    match &request.payload {
        Some(Payload::Handshake(_)) => "handshake",
        Some(Payload::CreateSession(_)) => "create_session",
        Some(Payload::DeleteSession(_)) => "delete_session",
        Some(Payload::BeginTransaction(_)) => "begin_transaction",
        Some(Payload::CommitTransaction(_)) => "commit_transaction",
        Some(Payload::RollbackTransaction(_)) => "rollback_transaction",
        Some(Payload::ExecuteDataQuery(_)) => "execute_data_query",
        Some(Payload::ExecuteScanQuery(_)) => "execute_scan_query",
        None => "request",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let options = CallOptions::with_timeout(Duration::from_secs(5));
        let result = options.run(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_hits_deadline() {
        let options = CallOptions::with_timeout(Duration::from_millis(50));
        let result = options
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(Interrupted::Deadline));
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let token = CancellationToken::new();
        let options = CallOptions::new().cancelled_by(token.clone());
        token.cancel();
        let result = options.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_envelope_ids_are_unique_and_carry_timeout() {
        let options = CallOptions::with_timeout(Duration::from_secs(3));
        let payload = || {
            proto::client_request::Payload::CreateSession(proto::CreateSessionRequest {})
        };
        let first = envelope(payload(), &options);
        let second = envelope(payload(), &options);
        assert_ne!(first.request_id, second.request_id);
        let timeout = first.operation_timeout.unwrap();
        assert!(timeout.seconds <= 3);
        assert!(envelope(payload(), &CallOptions::new()).operation_timeout.is_none());
    }

    #[test]
    fn test_transport_error_maps_unchanged() {
        let error: ClientError = TransportError::Timeout { operation: "send" }.into();
        assert_eq!(error, ClientError::Timeout { operation: "send" });

        let error: ClientError =
            TransportError::connectivity(ConnectivityKind::Unreachable, "refused").into();
        assert_eq!(error.kind(), crate::error::ErrorKind::Connectivity);
    }
}
