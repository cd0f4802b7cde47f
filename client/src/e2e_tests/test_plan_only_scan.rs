//! Test a scan that asks only for the query plan.

use crate::e2e_tests::helpers::*;
use crate::query::{ScanSettings, ScanState};
use crate::types::query_request::QueryRequest;

#[tokio::test]
async fn test_plan_only_scan_returns_plan_without_rows() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let mut stream = test
        .client
        .executor()
        .execute_streaming(&mut session, &QueryRequest::new("select 42;"), ScanSettings::plan_only())
        .await
        .unwrap();

    assert!(stream.next_batch().await.unwrap().is_none());
    assert!(stream.plan().is_some_and(|plan| plan.contains("select 42")));
    assert_eq!(stream.batches_delivered(), 0);
    assert!(stream.schema().is_none());
    assert!(matches!(stream.outcome(), Some(Ok(()))));
    assert_eq!(stream.state(), ScanState::Closed);
    drop(stream);

    assert!(!session.is_broken());
    session.release();
    assert_eq!(test.client.stats().idle, 1);
}
