mod common;

use common::*;
use datastore::{record, Value};

const TIMES_TWO: &str = "CREATE FUNCTION times_two(x INT) RETURNS INT LANGUAGE PYTHON { return x * 2 };";

#[tokio::test]
async fn replacing_a_view_twice_leaves_one_view() {
    let (db, _catalog, ds) = datastore();
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "a" }, record! { "ID" => 2, "VALUE" => "b" }], &plain_spec())
        .await
        .unwrap();

    let q = "SELECT VALUE FROM T WHERE ID = %s";
    assert!(!ds.create_or_replace_view("V", q, &[Value::Int(1)]).await.unwrap());
    assert!(ds.create_or_replace_view("V", q, &[Value::Int(2)]).await.unwrap());
    assert_eq!(db.view_names(), vec!["V".to_string()]);
    assert_eq!(db.view_rows("V").unwrap(), vec![record! { "VALUE" => "b" }]);

    // a view reads through to later writes
    ds.insert("T", &[record! { "ID" => 2, "VALUE" => "c" }], &Default::default()).await.unwrap();
    assert_eq!(db.view_rows("V").unwrap().len(), 2);
}

#[tokio::test]
async fn views_are_not_catalogued() {
    let (_db, catalog, ds) = datastore();
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "a" }], &plain_spec()).await.unwrap();
    ds.create_or_replace_view("V", "SELECT * FROM T", &[]).await.unwrap();
    assert_eq!(catalog.len(), 1);
}

#[tokio::test]
async fn view_over_missing_relation_fails_and_leaves_nothing() {
    let (db, _catalog, ds) = datastore();
    let err = ds.create_or_replace_view("V", "SELECT * FROM NOPE", &[]).await.unwrap_err();
    assert!(matches!(err, datastore::DatastoreError::Database { .. }));
    assert!(!db.has_view("V"));
}

#[tokio::test]
async fn function_create_check_replace() {
    let (db, _catalog, ds) = datastore();
    assert!(!ds.check_if_function_exists("times_two").await.unwrap());
    assert!(!ds.create_or_replace_function("times_two", TIMES_TWO).await.unwrap());
    assert!(ds.check_if_function_exists("TIMES_TWO").await.unwrap());

    let tripled = TIMES_TWO.replace("x * 2", "x * 3");
    assert!(ds.create_or_replace_function("times_two", &tripled).await.unwrap());
    assert_eq!(db.function_script("times_two").as_deref(), Some(tripled.as_str()));
}

#[tokio::test]
async fn function_script_must_define_the_named_function() {
    let (db, _catalog, ds) = datastore();
    let err = ds.create_or_replace_function("other", TIMES_TWO).await.unwrap_err();
    assert!(matches!(err, datastore::DatastoreError::Validation { .. }));
    assert!(!db.has_function("other"));
}
