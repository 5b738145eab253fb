mod common;

use std::sync::Arc;

use common::*;
use datastore::catalog::CatalogStore;
use datastore::partition::MatchPolicy;
use datastore::{record, ColumnDef, DatastoreError, KeyValues, TableSpec, Value};

#[tokio::test]
async fn scenario_a_insert_into_plain_table() {
    let (db, catalog, ds) = datastore();
    let out = ds
        .insert("T", &[record! { "ID" => 1, "VALUE" => "toto" }, record! { "ID" => 2, "VALUE" => "titi" }], &plain_spec())
        .await
        .unwrap();
    assert!(out.table_created);
    assert_eq!(out.inserted, 2);
    assert_eq!(db.count("T"), Some(2));
    let doc = catalog.find_one("T").unwrap().unwrap();
    assert!(!doc.is_partitioned);
    assert_eq!(doc.columns, id_value_columns());
}

#[tokio::test]
async fn scenario_b_delete_by_key() {
    let (db, _catalog, ds) = datastore();
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "toto" }, record! { "ID" => 2, "VALUE" => "titi" }], &plain_spec())
        .await
        .unwrap();
    let out = ds.delete("T", &record! { "ID" => 1 }).await.unwrap();
    assert_eq!(out.deleted, 1);
    assert_eq!(db.count("T"), Some(1));
    assert_eq!(db.rows("T").unwrap()[0].get("ID"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn scenario_c_upsert_updates_and_inserts() {
    let (db, _catalog, ds) = datastore();
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "toto" }, record! { "ID" => 2, "VALUE" => "titi" }], &plain_spec())
        .await
        .unwrap();
    let out = ds
        .upsert("T", "ID", &[record! { "ID" => 2, "VALUE" => "tata" }, record! { "ID" => 3, "VALUE" => "tutu" }], &TableSpec::default())
        .await
        .unwrap();
    assert_eq!((out.updated, out.inserted), (1, 1));
    let rows = db.rows("T").unwrap();
    let value_of = |id: i64| rows.iter().find(|r| r.get("ID") == Some(&Value::Int(id))).and_then(|r| r.get("VALUE").cloned());
    assert_eq!(value_of(2), Some(Value::from("tata")));
    assert_eq!(value_of(3), Some(Value::from("tutu")));
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn scenario_d_partitioned_insert_creates_one_partition_per_key() {
    let (db, catalog, ds) = datastore();
    let out = ds
        .insert("P", &[record! { "ID" => 1, "VALUE" => "toto" }, record! { "ID" => 2, "VALUE" => "titi" }], &partitioned_spec())
        .await
        .unwrap();
    assert_eq!(out.partitions_created, 2);
    let doc = catalog.find_one("P").unwrap().unwrap();
    assert!(doc.is_partitioned);
    assert_eq!(doc.partitions.len(), 2);
    assert_ne!(doc.partitions[0].name, doc.partitions[1].name);
    for p in &doc.partitions {
        let rows = db.rows(&p.name).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ID"), p.key_values.get("ID"));
    }
    assert_eq!(db.count("P"), Some(2));
    assert_eq!(db.partitions_of("P").len(), 2);
}

#[tokio::test]
async fn scenario_e_update_and_upsert_on_partitioned_table_issue_nothing() {
    let (db, _catalog, ds) = datastore();
    ds.insert("P", &[record! { "ID" => 1, "VALUE" => "toto" }], &partitioned_spec()).await.unwrap();
    db.clear_log();
    for _ in 0..3 {
        let err = ds.update("P", &record! { "ID" => 1 }, &record! { "VALUE" => "x" }).await.unwrap_err();
        assert!(err.is_not_supported());
        let err = ds.update_many("P", "ID", &[record! { "ID" => 1, "VALUE" => "x" }]).await.unwrap_err();
        assert!(err.is_not_supported());
        let err = ds.upsert("P", "ID", &[record! { "ID" => 1, "VALUE" => "x" }], &TableSpec::default()).await.unwrap_err();
        assert!(err.is_not_supported());
    }
    assert!(db.statement_log().is_empty(), "unexpected statements: {:?}", db.statement_log());
}

#[tokio::test]
async fn routing_is_deterministic_per_key() {
    let (db, catalog, ds) = datastore();
    ds.insert("P", &[record! { "ID" => 1, "VALUE" => "a" }], &partitioned_spec()).await.unwrap();
    let again = ds.insert("P", &[record! { "ID" => 1, "VALUE" => "b" }], &TableSpec::default()).await.unwrap();
    assert_eq!(again.partitions_created, 0);
    ds.insert("P", &[record! { "ID" => 2, "VALUE" => "c" }], &TableSpec::default()).await.unwrap();

    let doc = catalog.find_one("P").unwrap().unwrap();
    assert_eq!(doc.partitions.len(), 2);
    let one = doc.partitions.iter().find(|p| p.key_values.get("ID") == Some(&Value::Int(1))).unwrap();
    let two = doc.partitions.iter().find(|p| p.key_values.get("ID") == Some(&Value::Int(2))).unwrap();
    assert_eq!(db.count(&one.name), Some(2));
    assert_eq!(db.count(&two.name), Some(1));
}

#[tokio::test]
async fn mode_is_fixed_at_creation() {
    let (_db, _catalog, ds) = datastore();
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "a" }], &plain_spec()).await.unwrap();
    for _ in 0..3 {
        let err = ds.upsert("T", "ID", &[record! { "ID" => 1, "VALUE" => "b" }], &partitioned_spec()).await.unwrap_err();
        assert!(err.is_not_supported());
    }
    let err = ds.insert("T", &[record! { "ID" => 2, "VALUE" => "b" }], &partitioned_spec()).await.unwrap_err();
    assert!(matches!(err, DatastoreError::Validation { .. }));
    assert_eq!(err.code_str(), "partition_key_mismatch");
}

#[tokio::test]
async fn delete_by_partition_key_drops_only_that_partition() {
    let (db, catalog, ds) = datastore();
    let recs = [
        record! { "ID" => 1, "VALUE" => "a" },
        record! { "ID" => 1, "VALUE" => "b" },
        record! { "ID" => 2, "VALUE" => "c" },
    ];
    ds.insert("P", &recs, &partitioned_spec()).await.unwrap();
    let doomed = catalog.find_one("P").unwrap().unwrap().partitions.into_iter().find(|p| p.key_values.get("ID") == Some(&Value::Int(1))).unwrap();

    let out = ds.delete("P", &record! { "id" => 1 }).await.unwrap();
    assert_eq!(out.partitions_dropped, 1);
    assert!(!db.has_table(&doomed.name));
    assert_eq!(db.count("P"), Some(1));
    let doc = catalog.find_one("P").unwrap().unwrap();
    assert_eq!(doc.partitions.len(), 1);
    assert_eq!(doc.partitions[0].key_values.get("ID"), Some(&Value::Int(2)));

    let again = ds.delete("P", &record! { "ID" => 1 }).await.unwrap();
    assert_eq!(again.partitions_dropped, 0);
}

#[tokio::test]
async fn partial_key_delete_on_partitioned_table_is_not_supported() {
    let (db, _catalog, ds) = datastore();
    let spec = TableSpec::partitioned(
        vec![ColumnDef::new("REGION", "VARCHAR(8)"), ColumnDef::new("YEAR", "INTEGER"), ColumnDef::new("AMOUNT", "DOUBLE")],
        vec!["REGION".into(), "YEAR".into()],
    );
    ds.insert("SALES", &[record! { "REGION" => "eu", "YEAR" => 2020, "AMOUNT" => 1.5 }], &spec).await.unwrap();
    let err = ds.delete("SALES", &record! { "REGION" => "eu" }).await.unwrap_err();
    assert!(err.is_not_supported());
    assert_eq!(db.count("SALES"), Some(1));
}

#[tokio::test]
async fn match_policy_decides_partial_key_routing() {
    let spec = TableSpec::partitioned(
        vec![ColumnDef::new("REGION", "VARCHAR(8)"), ColumnDef::new("YEAR", "INTEGER")],
        vec!["REGION".into(), "YEAR".into()],
    );
    let recs = [record! { "REGION" => "eu", "YEAR" => 2020 }, record! { "REGION" => "eu", "YEAR" => 2021 }];

    let (_db, catalog, ds) = datastore_with(datastore::catalog::MemoryCatalog::new(), MatchPolicy::AnyKey);
    ds.insert("S", &recs, &spec).await.unwrap();
    assert_eq!(catalog.find_one("S").unwrap().unwrap().partitions.len(), 1);

    let (_db, catalog, ds) = datastore_with(datastore::catalog::MemoryCatalog::new(), MatchPolicy::AllKeys);
    ds.insert("S", &recs, &spec).await.unwrap();
    assert_eq!(catalog.find_one("S").unwrap().unwrap().partitions.len(), 2);
}

#[tokio::test]
async fn missing_partition_key_is_key_error_before_any_row() {
    let (db, _catalog, ds) = datastore();
    let err = ds
        .insert("P", &[record! { "ID" => 1, "VALUE" => "a" }, record! { "VALUE" => "b" }], &partitioned_spec())
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Key { .. }));
    assert_eq!(db.count("P"), Some(0));
    assert!(db.partitions_of("P").is_empty());
}

#[tokio::test]
async fn catalog_failure_leaves_physical_partition_behind() {
    let (db, catalog, ds) = datastore_with(FlakyCatalog::default(), MatchPolicy::AnyKey);
    ds.insert("P", &[], &partitioned_spec()).await.unwrap();
    *catalog.fail_updates.lock() = true;

    let err = ds.insert("P", &[record! { "ID" => 7, "VALUE" => "x" }], &TableSpec::default()).await.unwrap_err();
    assert!(matches!(err, DatastoreError::Catalog { .. }));
    let orphans = db.partitions_of("P");
    assert_eq!(orphans.len(), 1);
    assert_eq!(db.count(&orphans[0]), Some(0));
    assert!(catalog.find_one("P").unwrap().unwrap().partitions.is_empty());
}

#[tokio::test]
async fn failing_row_keeps_committed_partitions_but_no_rows() {
    let (db, catalog, ds) = datastore();
    ds.insert("P", &[], &partitioned_spec()).await.unwrap();
    ds.insert("P", &[record! { "ID" => 1, "VALUE" => "a" }], &TableSpec::default()).await.unwrap();
    let first = catalog.find_one("P").unwrap().unwrap().partitions[0].name.clone();
    db.fail_statements_on(&first);

    let err = ds
        .insert("P", &[record! { "ID" => 2, "VALUE" => "b" }, record! { "ID" => 1, "VALUE" => "c" }], &TableSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Database { .. }));
    db.clear_failures();
    assert_eq!(catalog.find_one("P").unwrap().unwrap().partitions.len(), 2);
    assert_eq!(db.count("P"), Some(1));
}

#[tokio::test]
async fn concurrent_batches_share_one_partition_per_key() {
    let (_db, catalog, ds) = datastore_with(datastore::catalog::MemoryCatalog::new(), MatchPolicy::AllKeys);
    let ds = Arc::new(ds);
    ds.insert("P", &[], &partitioned_spec()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let ds = ds.clone();
        handles.push(tokio::spawn(async move {
            let v = format!("v{}", i);
            ds.insert("P", &[record! { "ID" => 5, "VALUE" => v }], &TableSpec::default()).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let doc = catalog.find_one("P").unwrap().unwrap();
    assert_eq!(doc.partitions.len(), 1);
}

#[tokio::test]
async fn explicit_partition_maintenance() {
    let (db, catalog, ds) = datastore();
    ds.insert("P", &[], &partitioned_spec()).await.unwrap();
    let mut kv = KeyValues::new();
    kv.insert("id".into(), Value::Int(9));

    let (part, created) = ds.add_partition("P", &kv).await.unwrap();
    assert!(created);
    assert_eq!(part.key_values.get("ID"), Some(&Value::Int(9)));
    let (same, created) = ds.add_partition("P", &kv).await.unwrap();
    assert!(!created);
    assert_eq!(same.name, part.name);

    let dropped = ds.drop_partition("P", &kv).await.unwrap().unwrap();
    assert_eq!(dropped.name, part.name);
    assert!(db.partitions_of("P").is_empty());
    assert!(catalog.find_one("P").unwrap().unwrap().partitions.is_empty());
    assert!(ds.drop_partition("P", &kv).await.unwrap().is_none());

    ds.insert("T", &[], &plain_spec()).await.unwrap();
    assert!(ds.add_partition("T", &kv).await.unwrap_err().is_not_supported());
}

#[tokio::test]
async fn untracked_physical_table_blocks_create() {
    let (_db, catalog, ds) = datastore();
    ds.create_table("T", &id_value_columns(), &[]).await.unwrap();
    catalog.delete_one("T").unwrap();
    let err = ds.create_table("T", &id_value_columns(), &[]).await.unwrap_err();
    assert_eq!(err.code_str(), "untracked_table");
    // rows can still be written to a table the catalog does not know
    ds.insert("T", &[record! { "ID" => 1, "VALUE" => "a" }], &TableSpec::default()).await.unwrap();
}

#[tokio::test]
async fn dropping_partitioned_table_leaves_partition_tables() {
    let (db, catalog, ds) = datastore();
    ds.insert("P", &[record! { "ID" => 1, "VALUE" => "a" }, record! { "ID" => 2, "VALUE" => "b" }], &partitioned_spec()).await.unwrap();
    let parts: Vec<String> = catalog.find_one("P").unwrap().unwrap().partitions.into_iter().map(|p| p.name).collect();
    assert_eq!(parts.len(), 2);
    assert!(ds.drop_table("P").await.unwrap());
    assert!(!db.has_table("P"));
    for p in &parts {
        assert!(db.has_table(p), "partition {} should survive the parent", p);
    }
    assert!(catalog.find_one("P").unwrap().is_none());
    assert!(!ds.drop_table("P").await.unwrap());
}

#[tokio::test]
async fn null_key_reuses_its_partition_across_batches() {
    let (db, catalog, ds) = datastore();
    ds.insert("P", &[record! { "ID" => Value::Null, "VALUE" => "a" }], &partitioned_spec()).await.unwrap();
    let out = ds.insert("P", &[record! { "ID" => Value::Null, "VALUE" => "b" }], &partitioned_spec()).await.unwrap();
    assert_eq!(out.partitions_created, 0);
    let doc = catalog.find_one("P").unwrap().unwrap();
    assert_eq!(doc.partitions.len(), 1);
    assert_eq!(db.count(&doc.partitions[0].name), Some(2));
}

#[tokio::test]
async fn key_mismatch_is_rejected_before_touching_the_database() {
    let (db, _catalog, ds) = datastore();
    ds.insert("P", &[record! { "ID" => 1, "VALUE" => "a" }], &partitioned_spec()).await.unwrap();
    let before = db.statement_log().len();
    let spec = TableSpec::partitioned(id_value_columns(), vec!["VALUE".to_string()]);
    let err = ds.insert("P", &[record! { "ID" => 2, "VALUE" => "b" }], &spec).await.unwrap_err();
    assert_eq!(err.code_str(), "partition_key_mismatch");
    assert_eq!(db.statement_log().len(), before);
}
