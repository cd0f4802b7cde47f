//! Test begin, commit and rollback across sessions and transactions.

use crate::e2e_tests::helpers::*;
use crate::error::ErrorKind;
use crate::transaction::{TxMode, TxState};
use crate::types::query_request::QueryRequest;

#[tokio::test]
async fn test_sequential_transactions_on_one_session() {
    let test = TestClient::new();
    let controller = test.client.controller();
    let mut session = test.client.session().await.unwrap();

    let mut first = controller
        .begin(&mut session, TxMode::SerializableReadWrite)
        .await
        .unwrap();
    controller.commit(&mut session, &mut first).await.unwrap();
    assert_eq!(first.state(), TxState::Committed);

    let mut second = controller
        .begin(&mut session, TxMode::SnapshotReadOnly)
        .await
        .unwrap();
    assert_ne!(first.tx_id(), second.tx_id());
    controller.rollback(&mut session, &mut second).await.unwrap();
    assert_eq!(second.state(), TxState::RolledBack);

    assert_eq!(test.database.committed_transactions(), 1);
    assert_eq!(test.database.rolled_back_transactions(), 1);
    assert_eq!(test.database.open_transactions(), 0);
}

#[tokio::test]
async fn test_finished_context_cannot_finish_again() {
    let test = TestClient::new();
    let controller = test.client.controller();
    let (mut session, mut context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();
    controller.commit(&mut session, &mut context).await.unwrap();
    let calls = test.transport.calls();

    let error = controller.commit(&mut session, &mut context).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    let error = controller.rollback(&mut session, &mut context).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    assert_eq!(test.transport.calls(), calls);

    let error = test
        .client
        .executor()
        .execute_buffered(&mut session, &mut context, &QueryRequest::new("select 1;"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_second_begin_on_busy_session_is_rejected() {
    let test = TestClient::new();
    let controller = test.client.controller();
    let (mut session, mut context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();

    let error = controller
        .begin(&mut session, TxMode::SerializableReadWrite)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    assert!(context.is_open());
    controller.rollback(&mut session, &mut context).await.unwrap();
}

#[tokio::test]
async fn test_modification_then_commit() {
    let test = TestClient::new();
    let controller = test.client.controller();
    let (mut session, mut context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();

    let result = test
        .client
        .executor()
        .execute_buffered(
            &mut session,
            &mut context,
            &QueryRequest::new("upsert into t (a) values (1);"),
        )
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.column_count(), 0);

    controller.commit(&mut session, &mut context).await.unwrap();
    assert!(context.committed());
}

#[tokio::test]
async fn test_leaked_transaction_discards_session() {
    let test = TestClient::new();
    let (session, context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();
    let leaked_id = session.id().to_owned();
    assert!(context.is_open());

    session.release();
    let stats = test.client.stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.open, 0);
    wait_until(|| !test.database.has_session(&leaked_id)).await;

    let fresh = test.client.session().await.unwrap();
    assert_ne!(fresh.id(), leaked_id);
    assert!(!fresh.has_open_transaction());
}
