//! Row router
//! ----------
//! Write path for row-level operations. Each operation first settles whether the
//! target exists (probe), creates it on first use when the caller supplied columns,
//! then issues its row statements on one connection and commits once.
//!
//! Partition DDL is committed as partitions are created, before any row statement, so
//! a failing row only rolls back the rows. Mode checks that reject an operation
//! (`NotSupported`) are made from the catalog before any statement is issued.

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::CatalogStore;
use crate::connection::Connection;
use crate::ddl::{self, commit, exec, query};
use crate::error::{DatastoreError, DatastoreResult};
use crate::ident;
use crate::model::{KeyValues, LogicalTable, TableSpec};
use crate::partition::{self, MatchPolicy, PartitionLocks};
use crate::sql::Statement;
use crate::value::{Record, Value};

/// Shared state a write needs besides its connection.
pub struct WriteContext<'a, S: CatalogStore + ?Sized> {
    pub catalog: &'a S,
    pub locks: &'a PartitionLocks,
    pub policy: MatchPolicy,
}

impl<'a, S: CatalogStore + ?Sized> WriteContext<'a, S> {
    pub fn new(catalog: &'a S, locks: &'a PartitionLocks, policy: MatchPolicy) -> Self { Self { catalog, locks, policy } }
}

/// What a write did; returned to RPC callers as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub table_created: bool,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub partitions_created: usize,
    pub partitions_dropped: usize,
}

fn without_column(record: &Record, column: &str) -> Record {
    record.iter().filter(|(c, _)| !c.eq_ignore_ascii_case(column)).map(|(c, v)| (c.to_string(), v.clone())).collect()
}

fn key_of<'r>(record: &'r Record, key: &str, table: &str) -> DatastoreResult<&'r Value> {
    record.get(key).ok_or_else(|| DatastoreError::key("missing_key", format!("record for '{}' has no value for key column '{}'", table, key)))
}

fn single_filter<'r>(filter: &'r Record, op: &str, table: &str) -> DatastoreResult<(&'r str, &'r Value)> {
    let mut it = filter.iter();
    match (it.next(), it.next()) {
        (Some(pair), None) => Ok(pair),
        (None, _) => Err(DatastoreError::validation("empty_filter", format!("{} on '{}' needs a key filter", op, table))),
        _ => Err(DatastoreError::not_supported(
            "multi_column_filter",
            format!("{} on '{}' supports a single filter column, got {}", op, table, filter.len()),
        )),
    }
}

fn reject_partitioned<S: CatalogStore + ?Sized>(catalog: &S, name: &str, op: &str) -> DatastoreResult<Option<LogicalTable>> {
    let doc = catalog.find_one(name)?;
    if let Some(t) = &doc {
        if t.is_partitioned {
            return Err(DatastoreError::not_supported(
                format!("partitioned_{}", op),
                format!("{} is not supported on partitioned table '{}'", op, name),
            ));
        }
    }
    Ok(doc)
}

/// Existing catalog document, or an unpartitioned stand-in for a table the catalog
/// does not know.
fn tracked_or_untracked<S: CatalogStore + ?Sized>(catalog: &S, name: &str, columns: &[crate::model::ColumnDef]) -> DatastoreResult<LogicalTable> {
    Ok(catalog.find_one(name)?.unwrap_or_else(|| LogicalTable::untracked(name, columns.to_vec())))
}

/// Probe the table and create it from `spec` if absent. Returns the catalog view of
/// the table and whether it was created.
pub async fn ensure_table<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    spec: &TableSpec,
) -> DatastoreResult<(LogicalTable, bool)> {
    ident::validate_relation("table", name)?;
    let doc = ctx.catalog.find_one(name)?;
    if let Some(table) = &doc {
        partition::validate_partition_keys(table, &spec.partition_keys)?;
    }
    if ddl::table_exists(conn, name).await? {
        let table = match doc {
            Some(table) => table,
            None => {
                let table = LogicalTable::untracked(name, spec.columns.clone());
                partition::validate_partition_keys(&table, &spec.partition_keys)?;
                table
            }
        };
        return Ok((table, false));
    }
    if spec.columns.is_empty() {
        return Err(DatastoreError::validation(
            "missing_columns",
            format!("table '{}' does not exist and no columns were given to create it", name),
        ));
    }
    let table = ddl::create_table(conn, ctx.catalog, name, &spec.columns, &spec.partition_keys).await?;
    Ok((table, true))
}

/// Insert records, creating the table (and partitions) as needed.
pub async fn insert<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    records: &[Record],
    spec: &TableSpec,
) -> DatastoreResult<WriteOutcome> {
    let (table, created) = ensure_table(conn, ctx, name, spec).await?;
    let mut out = WriteOutcome { table_created: created, ..Default::default() };
    for r in records {
        table.check_record(r)?;
        if table.is_partitioned {
            partition::key_values(&table, r)?;
        }
    }
    if records.is_empty() {
        return Ok(out);
    }

    let targets = if table.is_partitioned {
        let batch = partition::resolve_batch(conn, ctx.catalog, ctx.locks, name, records, ctx.policy).await?;
        out.partitions_created = batch.created;
        batch.targets
    } else {
        vec![name.to_string(); records.len()]
    };
    let stmts = records.iter().zip(&targets).map(|(r, t)| Statement::insert(t, r)).collect::<DatastoreResult<Vec<_>>>()?;
    for s in &stmts {
        out.inserted += exec(conn, s).await?;
    }
    commit(conn).await?;
    info!(
        target: "datastore::router",
        "INSERT {}: {} row(s), {} new partition(s)", name, out.inserted, out.partitions_created
    );
    Ok(out)
}

/// Delete by key. On a partitioned table the filter must name exactly the partition
/// keys and the whole matching partition is detached and dropped.
pub async fn delete<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    key_filter: &Record,
) -> DatastoreResult<WriteOutcome> {
    ident::validate_relation("table", name)?;
    if key_filter.is_empty() {
        return Err(DatastoreError::validation("empty_filter", format!("delete on '{}' needs a key filter", name)));
    }
    if !ddl::table_exists(conn, name).await? {
        debug!(target: "datastore::router", "DELETE {}: table absent, nothing to do", name);
        return Ok(WriteOutcome::default());
    }
    let table = tracked_or_untracked(ctx.catalog, name, &[])?;
    let mut out = WriteOutcome::default();

    if table.is_partitioned {
        let supplied: KeyValues = key_filter.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let kv = table.normalize_key_values(&supplied).map_err(|_| {
            DatastoreError::not_supported(
                "partial_partition_delete",
                format!("delete on partitioned table '{}' needs exactly the partition keys {:?}", name, table.partition_keys),
            )
        })?;
        let _guard = ctx.locks.acquire(name).await;
        let current = tracked_or_untracked(ctx.catalog, name, &[])?;
        let Some(part) = partition::find_partition(&current, &kv, MatchPolicy::AllKeys).cloned() else {
            debug!(target: "datastore::router", "DELETE {}: no partition for {:?}", name, kv);
            return Ok(out);
        };
        ddl::drop_partition(conn, ctx.catalog, name, &part.name, &part.key_values).await?;
        exec(conn, &Statement::drop_table(&part.name)?).await?;
        commit(conn).await?;
        out.partitions_dropped = 1;
        info!(target: "datastore::router", "DELETE {}: dropped partition {} for {:?}", name, part.name, kv);
        return Ok(out);
    }

    let (col, val) = single_filter(key_filter, "delete", name)?;
    table.check_columns([col])?;
    out.deleted = exec(conn, &Statement::delete(name, col, val.clone())?).await?;
    commit(conn).await?;
    info!(target: "datastore::router", "DELETE {}: {} row(s) where {} = {}", name, out.deleted, col, val);
    Ok(out)
}

/// `UPDATE t SET <changes> WHERE <col> = <value>` on a non-partitioned table.
pub async fn update<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    key_filter: &Record,
    changes: &Record,
) -> DatastoreResult<WriteOutcome> {
    ident::validate_relation("table", name)?;
    let doc = reject_partitioned(ctx.catalog, name, "update")?;
    let (col, val) = single_filter(key_filter, "update", name)?;
    if changes.is_empty() {
        return Err(DatastoreError::validation("empty_changes", format!("update on '{}' has no columns to set", name)));
    }
    if !ddl::table_exists(conn, name).await? {
        debug!(target: "datastore::router", "UPDATE {}: table absent, nothing to do", name);
        return Ok(WriteOutcome::default());
    }
    let table = doc.unwrap_or_else(|| LogicalTable::untracked(name, Vec::new()));
    table.check_columns([col])?;
    table.check_record(changes)?;

    let updated = exec(conn, &Statement::update(name, changes, col, val.clone())?).await?;
    commit(conn).await?;
    info!(target: "datastore::router", "UPDATE {}: {} row(s) where {} = {}", name, updated, col, val);
    Ok(WriteOutcome { updated, ..Default::default() })
}

/// Per record, set every other column where `key` equals the record's key value.
pub async fn update_many<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    key: &str,
    records: &[Record],
) -> DatastoreResult<WriteOutcome> {
    ident::validate_relation("table", name)?;
    let doc = reject_partitioned(ctx.catalog, name, "update")?;
    ident::validate_column(key)?;
    for r in records {
        key_of(r, key, name)?;
    }
    if records.is_empty() || !ddl::table_exists(conn, name).await? {
        return Ok(WriteOutcome::default());
    }
    let table = doc.unwrap_or_else(|| LogicalTable::untracked(name, Vec::new()));
    table.check_columns([key])?;
    let mut stmts = Vec::with_capacity(records.len());
    for r in records {
        table.check_record(r)?;
        let changes = without_column(r, key);
        if changes.is_empty() {
            continue;
        }
        stmts.push(Statement::update(name, &changes, key, key_of(r, key, name)?.clone())?);
    }

    let mut out = WriteOutcome::default();
    for s in &stmts {
        out.updated += exec(conn, s).await?;
    }
    commit(conn).await?;
    info!(target: "datastore::router", "UPDATE {}: {} row(s) by {}", name, out.updated, key);
    Ok(out)
}

/// Update-or-insert by a single key column. Non-partitioned tables only.
pub async fn upsert<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    key: &str,
    records: &[Record],
    spec: &TableSpec,
) -> DatastoreResult<WriteOutcome> {
    ident::validate_relation("table", name)?;
    if spec.wants_partitioning() {
        return Err(DatastoreError::not_supported(
            "partitioned_upsert",
            format!("upsert cannot create partitioned table '{}'", name),
        ));
    }
    reject_partitioned(ctx.catalog, name, "upsert")?;
    ident::validate_column(key)?;
    for r in records {
        key_of(r, key, name)?;
    }

    let (table, created) = ensure_table(conn, ctx, name, spec).await?;
    if table.is_partitioned {
        return Err(DatastoreError::not_supported("partitioned_upsert", format!("upsert is not supported on partitioned table '{}'", name)));
    }
    table.check_columns([key])?;
    for r in records {
        table.check_record(r)?;
    }

    let mut out = WriteOutcome { table_created: created, ..Default::default() };
    for r in records {
        let kv = key_of(r, key, name)?.clone();
        let present = query(conn, &Statement::select_by_key(name, key, kv.clone())?).await? > 0;
        if present {
            let changes = without_column(r, key);
            if !changes.is_empty() {
                out.updated += exec(conn, &Statement::update(name, &changes, key, kv)?).await?;
            }
        } else {
            out.inserted += exec(conn, &Statement::insert(name, r)?).await?;
        }
    }
    commit(conn).await?;
    info!(target: "datastore::router", "UPSERT {}: {} inserted, {} updated", name, out.inserted, out.updated);
    Ok(out)
}

/// `INSERT INTO t <query>`, creating `t` shaped like the query when absent.
pub async fn insert_from_select<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    query_text: &str,
    params: &[Value],
) -> DatastoreResult<WriteOutcome> {
    ident::validate_relation("table", name)?;
    reject_partitioned(ctx.catalog, name, "insert_from_select")?;
    let stmt = Statement::insert_select(name, query_text, params)?;
    let mut out = WriteOutcome::default();
    if !ddl::table_exists(conn, name).await? {
        ddl::create_table_as(conn, ctx.catalog, name, query_text, params).await?;
        out.table_created = true;
    }
    out.inserted = exec(conn, &stmt).await?;
    commit(conn).await?;
    info!(target: "datastore::router", "INSERT {} FROM SELECT: {} row(s)", name, out.inserted);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::connection::MemoryDatabase;
    use crate::model::ColumnDef;
    use crate::record;

    fn spec() -> TableSpec { TableSpec::plain(vec![ColumnDef::new("ID", "INTEGER"), ColumnDef::new("VALUE", "VARCHAR(5)")]) }

    #[tokio::test]
    async fn first_insert_creates_then_reuses() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        let a = insert(&mut c, &ctx, "T", &[record! { "ID" => 1, "VALUE" => "a" }], &spec()).await.unwrap();
        assert!(a.table_created);
        let b = insert(&mut c, &ctx, "T", &[record! { "ID" => 2, "VALUE" => "b" }], &TableSpec::default()).await.unwrap();
        assert!(!b.table_created);
        assert_eq!(db.count("T"), Some(2));
    }

    #[tokio::test]
    async fn insert_without_columns_on_absent_table_fails() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        let err = insert(&mut c, &ctx, "T", &[record! { "ID" => 1 }], &TableSpec::default()).await.unwrap_err();
        assert_eq!(err.code_str(), "missing_columns");
    }

    #[tokio::test]
    async fn unknown_column_rejects_whole_batch() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        let recs = [record! { "ID" => 1, "VALUE" => "a" }, record! { "ID" => 2, "NOPE" => "b" }];
        let err = insert(&mut c, &ctx, "T", &recs, &spec()).await.unwrap_err();
        assert_eq!(err.code_str(), "unknown_column");
        assert_eq!(db.count("T"), Some(0));
    }

    #[tokio::test]
    async fn failing_row_rolls_back_the_batch() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        insert(&mut c, &ctx, "T", &[], &spec()).await.unwrap();
        db.fail_statements_on("T");
        let err = insert(&mut c, &ctx, "T", &[record! { "ID" => 1 }], &spec()).await.unwrap_err();
        assert!(matches!(err, DatastoreError::Database { .. }));
        db.clear_failures();
        assert_eq!(db.count("T"), Some(0));
    }

    #[tokio::test]
    async fn multi_column_delete_is_not_supported() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        insert(&mut c, &ctx, "T", &[record! { "ID" => 1, "VALUE" => "a" }], &spec()).await.unwrap();
        let err = delete(&mut c, &ctx, "T", &record! { "ID" => 1, "VALUE" => "a" }).await.unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(db.count("T"), Some(1));
    }

    #[tokio::test]
    async fn writes_against_absent_tables_are_no_ops() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        assert_eq!(delete(&mut c, &ctx, "GONE", &record! { "ID" => 1 }).await.unwrap(), WriteOutcome::default());
        assert_eq!(update(&mut c, &ctx, "GONE", &record! { "ID" => 1 }, &record! { "VALUE" => "x" }).await.unwrap(), WriteOutcome::default());
    }

    #[tokio::test]
    async fn update_many_sets_non_key_columns() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        insert(&mut c, &ctx, "T", &[record! { "ID" => 1, "VALUE" => "a" }, record! { "ID" => 2, "VALUE" => "b" }], &spec()).await.unwrap();
        let out = update_many(&mut c, &ctx, "T", "ID", &[record! { "ID" => 2, "VALUE" => "z" }]).await.unwrap();
        assert_eq!(out.updated, 1);
        let rows = db.rows("T").unwrap();
        assert_eq!(rows[1].get("VALUE"), Some(&Value::from("z")));
        assert_eq!(rows[0].get("VALUE"), Some(&Value::from("a")));
    }

    #[tokio::test]
    async fn insert_from_select_creates_target_from_query() {
        let db = MemoryDatabase::new();
        let cat = MemoryCatalog::new();
        let locks = PartitionLocks::new();
        let ctx = WriteContext::new(&cat, &locks, MatchPolicy::AnyKey);
        let mut c = db.connect();
        insert(&mut c, &ctx, "SRC", &[record! { "ID" => 1, "VALUE" => "a" }, record! { "ID" => 2, "VALUE" => "b" }], &spec()).await.unwrap();
        let out = insert_from_select(&mut c, &ctx, "DST", "SELECT ID, VALUE FROM SRC WHERE ID = %s", &[Value::Int(2)]).await.unwrap();
        assert!(out.table_created);
        assert_eq!(out.inserted, 1);
        assert_eq!(db.rows("DST").unwrap(), vec![record! { "ID" => 2, "VALUE" => "b" }]);
        assert!(cat.find_one("DST").unwrap().unwrap().columns.is_empty());
    }
}
