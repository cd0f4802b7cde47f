//! Test that parameters are checked before anything is sent.

use crate::e2e_tests::helpers::*;
use crate::error::{ClientError, ErrorKind};
use crate::transaction::TxMode;
use crate::types::query_request::{Params, QueryRequest};
use crate::types::value::Value;

#[tokio::test]
async fn test_unbound_parameter_never_reaches_the_server() {
    let test = TestClient::new();
    let mut session = test.client.session().await.unwrap();
    let mut context = test
        .client
        .controller()
        .begin(&mut session, TxMode::SerializableReadWrite)
        .await
        .unwrap();
    let calls = test.transport.calls();

    let request = QueryRequest::with_params(
        "select $id, $name;",
        Params::new().bind("$id", 7_i64),
    );
    let error = test
        .client
        .executor()
        .execute_buffered(&mut session, &mut context, &request)
        .await
        .unwrap_err();

    assert_eq!(
        error,
        ClientError::ParameterBinding {
            missing: vec!["$name".to_string()]
        }
    );
    assert_eq!(test.transport.calls(), calls);
    assert!(context.is_open());
}

#[tokio::test]
async fn test_bound_parameters_come_back() {
    let test = TestClient::new();
    let request = QueryRequest::with_params(
        "select $id as id, $name as name;",
        Params::new().bind("id", 7_i64).bind("$name", "ada"),
    );

    let result_sets = test
        .client
        .execute_once(TxMode::SerializableReadWrite, &request)
        .await
        .unwrap();
    let row = result_sets[0].row(0).unwrap();
    assert_eq!(row.get_int64("id").unwrap(), 7);
    assert_eq!(row.get_text("name").unwrap(), "ada");
    assert_eq!(row.get("name").unwrap(), &Value::from("ada"));
}

#[tokio::test]
async fn test_references_in_literals_need_no_binding() {
    let test = TestClient::new();
    let result = test
        .client
        .query(&QueryRequest::new("select '$not_a_parameter' as text;"))
        .await
        .unwrap();
    assert_eq!(result.row(0).unwrap().get_text("text").unwrap(), "$not_a_parameter");
}

#[tokio::test]
async fn test_empty_query_is_invalid() {
    let test = TestClient::new();
    let error = test.client.query(&QueryRequest::new("   ")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidQuery);
    assert_eq!(test.transport.calls(), 0);
}
