//! [`Transport`] that hands requests straight to a [`FakeDatabase`].
//!
//! Counts every request, can delay them, and injects faults per operation so
//! tests can assert that validation failures never reach the wire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;

use super::fake::FakeDatabase;
use crate::error::ConnectivityKind;
use crate::proto;
use crate::transport::{CallOptions, ResponseStream, Transport, TransportError, operation_name};
use crate::types::endpoint::Endpoint;

/// A failure injected in place of the next request of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The transport fails with this connectivity kind.
    Connectivity(ConnectivityKind),
    /// The server answers with this status and one issue.
    Status(proto::StatusCode, String),
    /// The request runs past its deadline.
    Timeout,
}

#[derive(Default)]
struct Injected {
    faults: HashMap<&'static str, VecDeque<Fault>>,
    delay: Option<Duration>,
    requests: Vec<proto::ClientRequest>,
}

pub struct MemoryTransport {
    endpoint: Endpoint,
    database: Arc<FakeDatabase>,
    calls: AtomicUsize,
    injected: Mutex<Injected>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(database: Arc<FakeDatabase>) -> Self {
        Self {
            endpoint: Endpoint::in_process(database.database()),
            database,
            calls: AtomicUsize::new(0),
            injected: Mutex::new(Injected::default()),
        }
    }

    fn injected(&self) -> MutexGuard<'_, Injected> {
        self.injected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Requests sent so far, unary and streaming.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request sent so far, oldest first.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // tests inspect what was sent
    pub fn requests(&self) -> Vec<proto::ClientRequest> {
        self.injected().requests.clone()
    }

    /// Fail the next request whose operation is `operation` (for example
    /// `"commit_transaction"`) with `fault`.
    pub fn fail_next(&self, operation: &'static str, fault: Fault) {
        self.injected()
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Hold every later request for `delay` before answering it.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.injected().delay = delay;
    }

    /// Record `request` and take the fault queued for its operation.
    #[allow(clippy::disallowed_methods)] // the request is both recorded and served
    fn admit(&self, request: &proto::ClientRequest) -> (Option<Fault>, Option<Duration>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut injected = self.injected();
        injected.requests.push(request.clone());
        let fault = injected
            .faults
            .get_mut(operation_name(request))
            .and_then(VecDeque::pop_front);
        (fault, injected.delay)
    }

    /// Wait out the configured delay under `options`, then apply `fault`.
    async fn prepare(
        options: &CallOptions,
        operation: &'static str,
        fault: Option<Fault>,
        delay: Option<Duration>,
        request_id: u64,
    ) -> Result<Option<proto::ServerResponse>, TransportError> {
        if let Some(delay) = delay {
            options
                .run(tokio::time::sleep(delay))
                .await
                .map_err(|interrupted| TransportError::interrupted(interrupted, operation))?;
        } else if let Err(interrupted) = options.run(std::future::ready(())).await {
            return Err(TransportError::interrupted(interrupted, operation));
        }

        match fault {
            None => Ok(None),
            Some(Fault::Connectivity(kind)) => Err(TransportError::connectivity(
                kind,
                format!("injected failure of {operation}"),
            )),
            Some(Fault::Timeout) => Err(TransportError::Timeout { operation }),
            Some(Fault::Status(status, message)) => Ok(Some(proto::ServerResponse::failure(
                request_id, status, message,
            ))),
        }
    }
}

impl Transport for MemoryTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect(&self, options: CallOptions) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if options.cancel.is_cancelled() {
                return Err(TransportError::Cancelled {
                    operation: "connect",
                });
            }
            let response = self.database.handshake(&proto::HandshakeRequest {
                database: self.endpoint.database().to_owned(),
                protocol_version: proto::PROTOCOL_VERSION,
            });
            if response.status_code() == proto::StatusCode::Success {
                Ok(())
            } else {
                Err(TransportError::connectivity(
                    ConnectivityKind::Handshake,
                    format!("fake database rejected the handshake: {:?}", response.status_code()),
                ))
            }
        })
    }

    fn send(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<proto::ServerResponse, TransportError>> {
        Box::pin(async move {
            let operation = operation_name(&request);
            let (fault, delay) = self.admit(&request);
            if let Some(response) =
                Self::prepare(&options, operation, fault, delay, request.request_id).await?
            {
                return Ok(response);
            }
            Ok(self.database.handle(request))
        })
    }

    fn open_stream(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<ResponseStream, TransportError>> {
        Box::pin(async move {
            let operation = operation_name(&request);
            let (fault, delay) = self.admit(&request);
            if let Some(response) =
                Self::prepare(&options, operation, fault, delay, request.request_id).await?
            {
                return Ok(futures::stream::iter([Ok(response)]).boxed());
            }

            let reply = self.database.scan(request);
            let disconnect = reply.disconnected.then(|| {
                Err(TransportError::connectivity(
                    ConnectivityKind::Broken,
                    "fake database dropped the stream",
                ))
            });
            let responses = futures::stream::iter(reply.responses.into_iter().map(Ok))
                .chain(futures::stream::iter(disconnect));
            Ok(responses.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::envelope;

    fn create_session() -> proto::ClientRequest {
        envelope(
            proto::client_request::Payload::CreateSession(proto::CreateSessionRequest {}),
            &CallOptions::new(),
        )
    }

    #[tokio::test]
    async fn test_counts_and_records_requests() {
        let transport = MemoryTransport::new(Arc::new(FakeDatabase::new("/local")));
        transport.connect(CallOptions::new()).await.unwrap();
        assert_eq!(transport.calls(), 0);

        let response = transport
            .send(create_session(), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(response.status_code(), proto::StatusCode::Success);
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fault_applies_once() {
        let transport = MemoryTransport::new(Arc::new(FakeDatabase::new("/local")));
        transport.fail_next("create_session", Fault::Timeout);

        let error = transport
            .send(create_session(), CallOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error, TransportError::Timeout {
            operation: "create_session"
        });
        assert!(transport.send(create_session(), CallOptions::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_runs_into_deadline() {
        let transport = MemoryTransport::new(Arc::new(FakeDatabase::new("/local")));
        transport.set_delay(Some(Duration::from_secs(10)));

        let error = transport
            .send(
                create_session(),
                CallOptions::with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::Timeout { .. }));
    }
}
