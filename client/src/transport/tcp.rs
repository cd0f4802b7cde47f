//! TCP binding of [`Transport`].
//!
//! Connections are opened lazily on first use and kept in a small idle set.
//! Each connection carries one request at a time: a unary call checks a
//! connection out, exchanges one frame each way and checks it back in; a
//! streaming call owns its connection until the final response and returns
//! it only if the stream ended cleanly. Any framing failure drops the
//! connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::frame::{FrameError, read_frame, write_frame};
use super::{CallOptions, Interrupted, ResponseStream, Transport, TransportError, operation_name};
use crate::error::ConnectivityKind;
use crate::proto;
use crate::types::endpoint::Endpoint;

/// Connection settings for [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSettings {
    /// Deadline for dialing plus the handshake.
    pub connect_timeout: Duration,
    /// Idle connections kept for reuse; extra ones are closed on check-in.
    pub max_idle_connections: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_idle_connections: 16,
        }
    }
}

type IdleSet = Arc<Mutex<Vec<TcpStream>>>;

pub struct TcpTransport {
    endpoint: Endpoint,
    settings: TcpSettings,
    idle: IdleSet,
}

impl TcpTransport {
    #[must_use]
    pub fn new(endpoint: Endpoint, settings: TcpSettings) -> Self {
        Self {
            endpoint,
            settings,
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of connections currently parked for reuse.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map_or(0, |idle| idle.len())
    }

    /// Close every idle connection. Connections in use close when their call ends.
    pub fn close(&self) {
        if let Ok(mut idle) = self.idle.lock() {
            let closed = idle.len();
            idle.clear();
            debug!("Closed {closed} idle connection(s) to {}", self.endpoint);
        }
    }

    async fn checkout(&self, options: &CallOptions) -> Result<TcpStream, TransportError> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match reused {
            Some(connection) => Ok(connection),
            None => self.open(options).await,
        }
    }

    /// Dial and handshake under the tighter of the connect timeout and the
    /// caller's deadline.
    async fn open(&self, options: &CallOptions) -> Result<TcpStream, TransportError> {
        let connect_deadline = Instant::now() + self.settings.connect_timeout;
        let connect_options = CallOptions {
            deadline: Some(
                options
                    .deadline
                    .map_or(connect_deadline, |deadline| deadline.min(connect_deadline)),
            ),
            cancel: options.cancel.child_token(),
        };

        match connect_options.run(self.dial()).await {
            Ok(result) => result,
            Err(Interrupted::Deadline) => Err(TransportError::connectivity(
                ConnectivityKind::DeadlineExceeded,
                format!("no connection to {} before the deadline", self.endpoint),
            )),
            Err(Interrupted::Cancelled) => Err(TransportError::Cancelled {
                operation: "connect",
            }),
        }
    }

    async fn dial(&self) -> Result<TcpStream, TransportError> {
        let address = self.endpoint.socket_address();
        let mut stream = TcpStream::connect(&address).await.map_err(|e| {
            TransportError::connectivity(ConnectivityKind::Unreachable, format!("{address}: {e}"))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {address}: {e}");
        }

        let handshake_failed = |message: String| {
            warn!("Handshake with {address} failed: {message}");
            TransportError::connectivity(ConnectivityKind::Handshake, message)
        };

        let handshake = proto::ClientRequest {
            request_id: 0,
            operation_timeout: None,
            payload: Some(proto::client_request::Payload::Handshake(
                proto::HandshakeRequest {
                    database: self.endpoint.database().to_owned(),
                    protocol_version: proto::PROTOCOL_VERSION,
                },
            )),
        };
        write_frame(&mut stream, &handshake)
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;
        let response: proto::ServerResponse = read_frame(&mut stream)
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;

        if response.status_code() != proto::StatusCode::Success {
            let reasons: Vec<&str> = response.issues.iter().map(|i| i.message.as_str()).collect();
            return Err(handshake_failed(format!(
                "rejected with {:?}: {}",
                response.status_code(),
                reasons.join("; ")
            )));
        }
        match response.result {
            Some(proto::server_response::Result::Handshake(result))
                if result.protocol_version == proto::PROTOCOL_VERSION =>
            {
                debug!("Connected to {}", self.endpoint);
                Ok(stream)
            }
            Some(proto::server_response::Result::Handshake(result)) => Err(handshake_failed(
                format!(
                    "server speaks protocol {}, client speaks {}",
                    result.protocol_version,
                    proto::PROTOCOL_VERSION
                ),
            )),
            _ => Err(handshake_failed("response carried no handshake result".to_string())),
        }
    }
}

fn check_in(idle: &IdleSet, connection: TcpStream, max_idle: usize) {
    if let Ok(mut idle) = idle.lock()
        && idle.len() < max_idle
    {
        idle.push(connection);
    }
}

fn broken(error: &FrameError) -> TransportError {
    TransportError::connectivity(ConnectivityKind::Broken, error.to_string())
}

fn check_request_id(response: &proto::ServerResponse, request_id: u64) -> Result<(), TransportError> {
    if response.request_id == request_id {
        Ok(())
    } else {
        Err(TransportError::connectivity(
            ConnectivityKind::Broken,
            format!(
                "response for request {} arrived while waiting for {request_id}",
                response.request_id
            ),
        ))
    }
}

struct StreamState {
    connection: TcpStream,
    options: CallOptions,
    request_id: u64,
    operation: &'static str,
    idle: IdleSet,
    max_idle: usize,
}

impl Transport for TcpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect(&self, options: CallOptions) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let connection = self.checkout(&options).await?;
            check_in(&self.idle, connection, self.settings.max_idle_connections);
            Ok(())
        })
    }

    fn send(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<proto::ServerResponse, TransportError>> {
        Box::pin(async move {
            let operation = operation_name(&request);
            let mut connection = self.checkout(&options).await?;

            let exchange = async {
                write_frame(&mut connection, &request).await?;
                read_frame::<_, proto::ServerResponse>(&mut connection).await
            };
            let response = match options.run(exchange).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(broken(&e)),
                Err(interrupted) => return Err(TransportError::interrupted(interrupted, operation)),
            };
            check_request_id(&response, request.request_id)?;

            check_in(&self.idle, connection, self.settings.max_idle_connections);
            Ok(response)
        })
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn open_stream(
        &self,
        request: proto::ClientRequest,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<ResponseStream, TransportError>> {
        Box::pin(async move {
            let operation = operation_name(&request);
            let mut connection = self.checkout(&options).await?;

            match options.run(write_frame(&mut connection, &request)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(broken(&e)),
                Err(interrupted) => return Err(TransportError::interrupted(interrupted, operation)),
            }

            let state = StreamState {
                connection,
                options,
                request_id: request.request_id,
                operation,
                idle: Arc::clone(&self.idle),
                max_idle: self.settings.max_idle_connections,
            };
            let responses = futures::stream::unfold(Some(state), |state| async move {
                let mut state = state?;
                let read = state
                    .options
                    .run(read_frame::<_, proto::ServerResponse>(&mut state.connection))
                    .await;
                let response = match read {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => return Some((Err(broken(&e)), None)),
                    Err(interrupted) => {
                        let error = TransportError::interrupted(interrupted, state.operation);
                        return Some((Err(error), None));
                    }
                };
                if let Err(e) = check_request_id(&response, state.request_id) {
                    return Some((Err(e), None));
                }

                let finished = response.end_of_stream
                    || response.status_code() != proto::StatusCode::Success;
                if finished {
                    check_in(&state.idle, state.connection, state.max_idle);
                    Some((Ok(response), None))
                } else {
                    Some((Ok(response), Some(state)))
                }
            });
            Ok(responses.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("127.0.0.1:{port}"), "/local").unwrap();
        let transport = TcpTransport::new(endpoint, TcpSettings::default());
        let error = transport
            .connect(CallOptions::with_timeout(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            TransportError::Connectivity {
                kind: ConnectivityKind::Unreachable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_silent_server_hits_connect_deadline() {
        // Accepts connections but never answers the handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let endpoint = Endpoint::parse(&format!("127.0.0.1:{port}"), "/local").unwrap();
        let settings = TcpSettings {
            connect_timeout: Duration::from_millis(100),
            ..TcpSettings::default()
        };
        let transport = TcpTransport::new(endpoint, settings);
        let error = transport.connect(CallOptions::new()).await.unwrap_err();
        assert!(matches!(
            error,
            TransportError::Connectivity {
                kind: ConnectivityKind::DeadlineExceeded,
                ..
            }
        ));
        assert_eq!(transport.idle_connections(), 0);
    }
}
