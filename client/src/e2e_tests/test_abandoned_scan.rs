//! Test that dropping a scan before its end discards the session.

use crate::e2e_tests::helpers::*;
use crate::query::ScanSettings;
use crate::testing::{ScanEnd, ScanScript, int32_batch};
use crate::types::query_request::QueryRequest;

#[tokio::test]
async fn test_abandoned_scan_discards_and_replaces_session() {
    let test = TestClient::new();
    test.database.script_scan(
        "select n from numbers;",
        ScanScript {
            batches: vec![
                int32_batch("n", [1, 2]),
                int32_batch("n", [3, 4]),
                int32_batch("n", [5]),
            ],
            end: ScanEnd::Success,
        },
    );

    let mut session = test.client.session().await.unwrap();
    let abandoned_id = session.id().to_owned();
    {
        let mut stream = test
            .client
            .executor()
            .execute_streaming(
                &mut session,
                &QueryRequest::new("select n from numbers;"),
                ScanSettings::default(),
            )
            .await
            .unwrap();
        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.row_count(), 2);
    }

    session.release();
    let stats = test.client.stats();
    assert_eq!(stats.discarded, 1);

    wait_until(|| !test.database.has_session(&abandoned_id)).await;
    wait_until(|| test.client.stats().idle == 1).await;
    assert_eq!(test.client.stats().created, 2);

    let replacement = test.client.session().await.unwrap();
    assert_ne!(replacement.id(), abandoned_id);
    assert_eq!(replacement.use_count(), 0);
}

#[tokio::test]
async fn test_drained_scan_keeps_session() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let id = session.id().to_owned();
    let batches = test
        .client
        .executor()
        .execute_streaming(&mut session, &QueryRequest::new("select 42;"), ScanSettings::default())
        .await
        .unwrap()
        .collect_batches()
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);

    session.release();
    assert_eq!(test.client.stats().discarded, 0);
    assert_eq!(test.client.session().await.unwrap().id(), id);
}
