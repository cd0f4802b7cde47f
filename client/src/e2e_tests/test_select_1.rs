//! Test the reference transactional query: `select 1;`.

use crate::e2e_tests::helpers::*;
use crate::transaction::TxMode;
use crate::transport::CallOptions;
use crate::types::query_request::QueryRequest;
use crate::types::value::ValueType;

#[tokio::test]
async fn test_select_1_in_serializable_transaction() {
    let test = TestClient::new();
    let (mut session, mut context) = test
        .client
        .begin(TxMode::SerializableReadWrite)
        .await
        .unwrap();

    let result = test
        .client
        .executor()
        .execute_buffered(&mut session, &mut context, &QueryRequest::new("select 1;"))
        .await
        .unwrap();

    assert_eq!(result.row_count(), 1);
    assert_eq!(result.column_count(), 1);
    assert_eq!(result.columns()[0].value_type, ValueType::Int32);
    assert_eq!(result.row(0).unwrap().get_int32(0).unwrap(), 1);

    test.client
        .controller()
        .commit(&mut session, &mut context)
        .await
        .unwrap();
    assert!(context.committed());
    assert_eq!(test.database.committed_transactions(), 1);
}

#[tokio::test]
async fn test_select_1_committed_in_the_same_request() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let calls = test.transport.calls();

    let result_sets = test
        .client
        .executor()
        .execute_once(
            &mut session,
            TxMode::SerializableReadWrite,
            &QueryRequest::new("select 1;"),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result_sets.len(), 1);
    assert_eq!(result_sets[0].row(0).unwrap().get_int32("column0").unwrap(), 1);
    assert_eq!(test.transport.calls(), calls + 1);
    assert_eq!(test.database.open_transactions(), 0);
    assert!(!session.has_open_transaction());
}

#[tokio::test]
async fn test_select_1_wrong_accessor_is_type_mismatch() {
    let test = TestClient::new();
    let result = test.client.query(&QueryRequest::new("select 1;")).await.unwrap();
    let error: crate::error::ClientError =
        result.row(0).unwrap().get_text(0).unwrap_err().into();
    assert_eq!(error.kind(), crate::error::ErrorKind::TypeMismatch);
}
