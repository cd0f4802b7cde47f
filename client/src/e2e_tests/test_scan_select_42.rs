//! Test the reference scan query: `select 42;`.

use crate::e2e_tests::helpers::*;
use crate::query::{ScanSettings, ScanState};
use crate::types::query_request::QueryRequest;

#[tokio::test]
async fn test_scan_select_42() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let mut stream = test
        .client
        .executor()
        .execute_streaming(&mut session, &QueryRequest::new("select 42;"), ScanSettings::default())
        .await
        .unwrap();
    assert_eq!(stream.state(), ScanState::Streaming);
    assert!(stream.outcome().is_none());

    let batch = stream.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.row_count(), 1);
    assert_eq!(batch.row(0).unwrap().get_int32(0).unwrap(), 42);

    assert!(stream.next_batch().await.unwrap().is_none());
    assert!(matches!(stream.outcome(), Some(Ok(()))));
    assert_eq!(stream.batches_delivered(), 1);
    assert_eq!(stream.rows_delivered(), 1);

    // Exhausted streams stay empty.
    assert!(stream.next_batch().await.unwrap().is_none());
    assert_eq!(stream.state(), ScanState::Closed);
}

#[tokio::test]
async fn test_scan_is_a_futures_stream() {
    use futures::StreamExt;

    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let stream = test
        .client
        .executor()
        .execute_streaming(&mut session, &QueryRequest::new("select 42;"), ScanSettings::default())
        .await
        .unwrap();

    let batches: Vec<_> = stream.collect().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].as_ref().unwrap().row(0).unwrap().get_int32(0).unwrap(), 42);
}

#[tokio::test]
async fn test_drained_scan_returns_session_to_pool() {
    let test = TestClient::new();
    let batches = test
        .client
        .scan_all(&QueryRequest::new("select 42;"), ScanSettings::default())
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);

    let stats = test.client.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.discarded, 0);
}
