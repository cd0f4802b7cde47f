//! Test the client against the fake database over a real TCP socket.

use crate::client::TableClient;
use crate::e2e_tests::helpers::*;
use crate::error::{ClientError, ConnectivityKind};
use crate::query::ScanSettings;
use crate::transaction::TxMode;
use crate::types::query_request::QueryRequest;

fn connectivity_kind(error: &ClientError) -> Option<ConnectivityKind> {
    match error {
        ClientError::Connectivity { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[tokio::test]
async fn test_select_and_scan_over_tcp() {
    let server = tcp_server().await;
    let client = TableClient::connect(tcp_config(&server.address(), DATABASE))
        .await
        .unwrap();

    let result_sets = client
        .execute_once(TxMode::SerializableReadWrite, &QueryRequest::new("select 1;"))
        .await
        .unwrap();
    assert_eq!(result_sets[0].row(0).unwrap().get_int32(0).unwrap(), 1);

    let batches = client
        .scan_all(&QueryRequest::new("select 42;"), ScanSettings::default())
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].row(0).unwrap().get_int32(0).unwrap(), 42);

    assert_eq!(server.database().committed_transactions(), 1);
    assert!(server.connections() >= 1);
    client.close().await;
    wait_until(|| server.database().active_sessions() == 0).await;
}

#[tokio::test]
async fn test_wrong_database_fails_handshake() {
    let server = tcp_server().await;
    let error = TableClient::connect(tcp_config(&server.address(), "/elsewhere"))
        .await
        .unwrap_err();
    assert_eq!(connectivity_kind(&error), Some(ConnectivityKind::Handshake));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_protocol_version_mismatch_fails_handshake() {
    let server = tcp_server().await;
    server.database().set_protocol_version(99);
    let error = TableClient::connect(tcp_config(&server.address(), DATABASE))
        .await
        .unwrap_err();
    assert_eq!(connectivity_kind(&error), Some(ConnectivityKind::Handshake));
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let error = TableClient::connect(tcp_config(&address, DATABASE))
        .await
        .unwrap_err();
    assert_eq!(connectivity_kind(&error), Some(ConnectivityKind::Unreachable));
}

#[tokio::test]
async fn test_server_shutdown_breaks_session() {
    let server = tcp_server().await;
    let client = TableClient::connect(tcp_config(&server.address(), DATABASE))
        .await
        .unwrap();
    let mut session = client.session().await.unwrap();
    server.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let error = client
        .executor()
        .execute_once(
            &mut session,
            TxMode::SerializableReadWrite,
            &QueryRequest::new("select 1;"),
            crate::transport::CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        connectivity_kind(&error),
        Some(ConnectivityKind::Broken | ConnectivityKind::Unreachable)
    ));
    assert!(session.is_broken());
}
