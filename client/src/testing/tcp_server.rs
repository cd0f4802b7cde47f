//! A [`FakeDatabase`] served over TCP with the real frame codec.
//!
//! Each accepted connection must open with a handshake; after that it
//! carries one request at a time, exactly as [`crate::transport::TcpTransport`]
//! uses it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fake::FakeDatabase;
use crate::proto;
use crate::transport::{FrameError, read_frame, write_frame};

pub struct FakeServer {
    address: SocketAddr,
    database: Arc<FakeDatabase>,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl FakeServer {
    /// Listen on an ephemeral localhost port and serve `database`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub async fn start(database: Arc<FakeDatabase>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let server = Self {
            address,
            database: Arc::clone(&database),
            connections: Arc::clone(&connections),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((socket, peer)) => {
                        connections.fetch_add(1, Ordering::SeqCst);
                        let database = Arc::clone(&database);
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            tokio::select! {
                                () = shutdown.cancelled() => {}
                                result = serve_connection(socket, &database) => {
                                    if let Err(e) = result {
                                        debug!("Fake server connection {peer} ended: {e}");
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => warn!("Fake server accept failed: {e}"),
                }
            }
        });
        debug!("Fake server listening on {address}");
        Ok(server)
    }

    /// `host:port` the server listens on.
    #[must_use]
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    #[must_use]
    pub fn database(&self) -> &FakeDatabase {
        &self.database
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and drop every open connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_connection(mut socket: TcpStream, database: &FakeDatabase) -> Result<(), FrameError> {
    let hello: proto::ClientRequest = read_frame(&mut socket).await?;
    let accepted = match hello.payload {
        Some(proto::client_request::Payload::Handshake(handshake)) => {
            let mut response = database.handshake(&handshake);
            response.request_id = hello.request_id;
            let accepted = response.status_code() == proto::StatusCode::Success;
            write_frame(&mut socket, &response).await?;
            accepted
        }
        _ => {
            let response = proto::ServerResponse::failure(
                hello.request_id,
                proto::StatusCode::BadRequest,
                "connection must open with a handshake",
            );
            write_frame(&mut socket, &response).await?;
            false
        }
    };
    if !accepted {
        return Ok(());
    }

    loop {
        let request: proto::ClientRequest = match read_frame(&mut socket).await {
            Ok(request) => request,
            Err(FrameError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };

        if matches!(
            request.payload,
            Some(proto::client_request::Payload::ExecuteScanQuery(_))
        ) {
            let reply = database.scan(request);
            for response in &reply.responses {
                write_frame(&mut socket, response).await?;
            }
            if reply.disconnected {
                return Ok(());
            }
        } else {
            write_frame(&mut socket, &database.handle(request)).await?;
        }
    }
}
