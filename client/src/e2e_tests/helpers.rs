//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use crate::client::TableClient;
use crate::config::ClientConfig;
use crate::testing::{FakeDatabase, FakeServer, MemoryTransport};

pub const DATABASE: &str = "/local";

/// A client wired to an in-process fake database.
pub struct TestClient {
    pub client: TableClient,
    pub database: Arc<FakeDatabase>,
    pub transport: Arc<MemoryTransport>,
}

impl TestClient {
    /// A client with default settings and a fresh database.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// A client whose configuration `adjust` may change first.
    #[must_use]
    pub fn with_config(adjust: impl FnOnce(&mut ClientConfig)) -> Self {
        let database = Arc::new(FakeDatabase::new(DATABASE));
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&database)));
        let mut config = ClientConfig::new("localhost:2136", DATABASE);
        adjust(&mut config);

        let client = TableClient::with_transport(config, Arc::clone(&transport) as _)
            .expect("test configuration is valid");
        Self {
            client,
            database,
            transport,
        }
    }
}

/// A fake database behind a real TCP listener.
pub async fn tcp_server() -> FakeServer {
    FakeServer::start(Arc::new(FakeDatabase::new(DATABASE)))
        .await
        .expect("fake server binds")
}

/// Configuration pointing at `address` with short timeouts.
#[must_use]
pub fn tcp_config(address: &str, database: &str) -> ClientConfig {
    let mut config = ClientConfig::new(address, database);
    config.connect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(2);
    config
}

/// Poll `condition` until it holds; background check-in work is asynchronous.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within one second");
}
