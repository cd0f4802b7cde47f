//! Test deadlines and cancellation on in-flight requests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::e2e_tests::helpers::*;
use crate::error::ErrorKind;
use crate::transaction::{TxMode, TxState};
use crate::transport::CallOptions;
use crate::types::query_request::QueryRequest;

#[tokio::test(start_paused = true)]
async fn test_slow_query_times_out_and_breaks_session() {
    let test = TestClient::new();
    let (mut session, mut context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();
    test.transport.set_delay(Some(Duration::from_secs(10)));

    let error = test
        .client
        .executor()
        .execute_buffered_with(
            &mut session,
            &mut context,
            &QueryRequest::new("select 1;"),
            CallOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.is_retryable());
    assert_eq!(context.state(), TxState::Broken);
    assert!(session.is_broken());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_from_config_applies() {
    let test = TestClient::with_config(|config| {
        config.request_timeout = Duration::from_millis(100);
    });
    let mut session = test.client.session().await.unwrap();
    test.transport.set_delay(Some(Duration::from_secs(10)));

    let error = test
        .client
        .executor()
        .execute_once(
            &mut session,
            TxMode::SerializableReadWrite,
            &QueryRequest::new("select 1;"),
            CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_cancelled_token_stops_request() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = test
        .client
        .executor()
        .execute_once(
            &mut session,
            TxMode::SerializableReadWrite,
            &QueryRequest::new("select 1;"),
            CallOptions::new().cancelled_by(cancel),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(!error.is_retryable());
    assert!(session.is_broken());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_response() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    test.transport.set_delay(Some(Duration::from_secs(10)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let error = test
        .client
        .executor()
        .execute_once(
            &mut session,
            TxMode::SerializableReadWrite,
            &QueryRequest::new("select 1;"),
            CallOptions::new().cancelled_by(cancel),
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    session.release();
    assert_eq!(test.client.stats().discarded, 1);
}

#[tokio::test]
async fn test_cancelled_acquire() {
    let test = TestClient::with_config(|config| {
        config.max_sessions = 1;
        config.session_acquire_timeout = Duration::from_secs(5);
    });
    let _held = test.client.session().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = test
        .client
        .pool()
        .acquire_with(CallOptions::new().cancelled_by(cancel))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}
