//! Test scans that fail after delivering part of their batches.

use crate::e2e_tests::helpers::*;
use crate::error::{ConnectivityKind, ErrorKind};
use crate::proto;
use crate::query::{ScanSettings, ScanState};
use crate::testing::{ScanEnd, ScanScript, int32_batch};
use crate::types::query_request::QueryRequest;

#[tokio::test]
async fn test_failure_after_two_batches() {
    let test = TestClient::new();
    test.database.script_scan(
        "select n from numbers;",
        ScanScript {
            batches: vec![int32_batch("n", [1, 2]), int32_batch("n", [3, 4])],
            end: ScanEnd::Failure {
                status: proto::StatusCode::Overloaded,
                message: "shard overloaded".to_string(),
            },
        },
    );

    let mut session = test.client.session().await.unwrap();
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
    let second = stream.next_batch().await.unwrap().unwrap();
    let error = stream.next_batch().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Execution);
    assert!(!error.issues().is_empty());
    assert!(error.is_retryable());
    assert_eq!(stream.batches_delivered(), 2);
    assert_eq!(stream.state(), ScanState::Finished);
    assert!(matches!(stream.outcome(), Some(Err(_))));

    // Delivered batches stay valid after the failure.
    assert_eq!(first.row(1).unwrap().get_int32("n").unwrap(), 2);
    assert_eq!(second.row(0).unwrap().get_int32("n").unwrap(), 3);

    assert!(stream.next_batch().await.unwrap().is_none());
    drop(stream);
    assert!(!session.is_broken());
}

#[tokio::test]
async fn test_disconnect_mid_scan_breaks_session() {
    let test = TestClient::new();
    test.database.script_scan(
        "select n from numbers;",
        ScanScript {
            batches: vec![int32_batch("n", [1])],
            end: ScanEnd::Disconnect,
        },
    );

    let mut session = test.client.session().await.unwrap();
    let broken_id = session.id().to_owned();
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

    assert!(stream.next_batch().await.unwrap().is_some());
    let error = stream.next_batch().await.unwrap_err();
    assert!(matches!(
        error,
        crate::error::ClientError::Connectivity {
            kind: ConnectivityKind::Broken,
            ..
        }
    ));
    drop(stream);
    assert!(session.is_broken());

    session.release();
    assert_eq!(test.client.stats().discarded, 1);
    wait_until(|| test.client.stats().idle == 1).await;
    let replacement = test.client.session().await.unwrap();
    assert_ne!(replacement.id(), broken_id);
}

#[tokio::test]
async fn test_batches_must_share_the_first_schema() {
    let test = TestClient::new();
    test.database.script_scan(
        "select n from drifting;",
        ScanScript {
            batches: vec![int32_batch("n", [1]), int32_batch("m", [2])],
            end: ScanEnd::Success,
        },
    );

    let mut session = test.client.session().await.unwrap();
    let mut stream = test
        .client
        .executor()
        .execute_streaming(
            &mut session,
            &QueryRequest::new("select n from drifting;"),
            ScanSettings::default(),
        )
        .await
        .unwrap();

    assert!(stream.next_batch().await.unwrap().is_some());
    let error = stream.next_batch().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Decode);
    assert_eq!(stream.schema().unwrap()[0].name, "n");
}
