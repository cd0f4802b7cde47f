//! Test that concurrent callers never push the pool past its ceiling.

use std::time::Duration;

use crate::e2e_tests::helpers::*;
use crate::error::ErrorKind;

#[tokio::test]
async fn test_eight_callers_three_sessions() {
    let test = TestClient::with_config(|config| {
        config.max_sessions = 3;
        config.session_acquire_timeout = Duration::from_millis(50);
    });

    let callers = (0..8).map(|_| {
        let client = test.client.clone();
        async move {
            let session = client.session().await?;
            let open = client.stats().open;
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(session);
            Ok::<usize, crate::error::ClientError>(open)
        }
    });
    let outcomes = futures::future::join_all(callers).await;

    let granted: Vec<usize> = outcomes.iter().filter_map(|o| o.as_ref().ok().copied()).collect();
    assert_eq!(granted.len(), 3);
    assert!(granted.iter().all(|open| *open <= 3));
    for outcome in outcomes.iter().filter(|o| o.is_err()) {
        assert_eq!(outcome.as_ref().unwrap_err().kind(), ErrorKind::PoolExhausted);
    }

    let stats = test.client.stats();
    assert_eq!(stats.open, 3);
    assert_eq!(stats.idle, 3);
    assert_eq!(test.database.active_sessions(), 3);
}

#[tokio::test]
async fn test_waiter_gets_released_session() {
    let test = TestClient::with_config(|config| {
        config.max_sessions = 1;
        config.session_acquire_timeout = Duration::from_secs(2);
    });

    let first = test.client.session().await.unwrap();
    let first_id = first.id().to_owned();
    let client = test.client.clone();
    let waiter = tokio::spawn(async move { client.session().await.map(|s| s.id().to_owned()) });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    first.release();

    assert_eq!(waiter.await.unwrap().unwrap(), first_id);
    assert_eq!(test.client.stats().created, 1);
}

#[tokio::test]
async fn test_exhausted_pool_reports_ceiling() {
    let test = TestClient::with_config(|config| {
        config.max_sessions = 1;
        config.session_acquire_timeout = Duration::from_millis(20);
    });

    let _held = test.client.session().await.unwrap();
    let error = test.client.session().await.unwrap_err();
    assert!(matches!(
        error,
        crate::error::ClientError::PoolExhausted { max_sessions: 1, .. }
    ));
    assert!(error.is_retryable());
}
