//! Table DDL manager
//! -----------------
//! Physical table lifecycle plus the matching catalog bookkeeping. Each DDL step is
//! committed in the database before the catalog is touched, so a catalog failure leaves
//! the physical object in place and surfaces as a `Catalog` error for the operator to
//! reconcile.
//!
//! `table_exists` rolls back after a missing-relation probe (PostgreSQL aborts the
//! transaction), so call it before any uncommitted work on the same connection.

use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogStore, CatalogUpdate};
use crate::connection::Connection;
use crate::error::{DatastoreError, DatastoreResult};
use crate::model::{ColumnDef, KeyValues, LogicalTable, PartitionRef};
use crate::sql::Statement;
use crate::value::Value;

/// Roll back after a failure; the original error is what the caller reports.
pub(crate) async fn rollback_quietly<C: Connection>(conn: &mut C) {
    if let Err(e) = conn.rollback().await {
        warn!(target: "datastore::ddl", "rollback after failure also failed: {}", e);
    }
}

/// Execute one statement; on failure roll back and report a `Database` error.
pub(crate) async fn exec<C: Connection>(conn: &mut C, stmt: &Statement) -> DatastoreResult<u64> {
    match conn.execute(stmt).await {
        Ok(n) => Ok(n),
        Err(e) => {
            rollback_quietly(conn).await;
            Err(e.into())
        }
    }
}

pub(crate) async fn query<C: Connection>(conn: &mut C, stmt: &Statement) -> DatastoreResult<u64> {
    match conn.select(stmt).await {
        Ok(n) => Ok(n),
        Err(e) => {
            rollback_quietly(conn).await;
            Err(e.into())
        }
    }
}

pub(crate) async fn commit<C: Connection>(conn: &mut C) -> DatastoreResult<()> {
    match conn.commit().await {
        Ok(()) => Ok(()),
        Err(e) => {
            rollback_quietly(conn).await;
            Err(e.into())
        }
    }
}

/// Probe with a bounded `SELECT 1 ... LIMIT 1`. Only a missing relation means "absent".
pub async fn table_exists<C: Connection>(conn: &mut C, name: &str) -> DatastoreResult<bool> {
    let probe = Statement::probe(name)?;
    match conn.select(&probe).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_relation_not_found() => {
            debug!(target: "datastore::ddl", "probe: '{}' does not exist", name);
            conn.rollback().await?;
            Ok(false)
        }
        Err(e) => {
            rollback_quietly(conn).await;
            Err(e.into())
        }
    }
}

/// Map requested partition keys onto declared column spellings.
fn declared_keys(name: &str, columns: &[ColumnDef], partition_keys: &[String]) -> DatastoreResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(partition_keys.len());
    for k in partition_keys {
        let col = columns.iter().find(|c| c.name.eq_ignore_ascii_case(k)).ok_or_else(|| {
            DatastoreError::validation("unknown_partition_key", format!("partition key '{}' is not a column of '{}'", k, name))
        })?;
        if out.iter().any(|o| o.eq_ignore_ascii_case(&col.name)) {
            return Err(DatastoreError::validation("duplicate_partition_key", format!("partition key '{}' listed twice for '{}'", k, name)));
        }
        out.push(col.name.clone());
    }
    Ok(out)
}

async fn reject_existing<C: Connection, S: CatalogStore + ?Sized>(conn: &mut C, catalog: &S, name: &str) -> DatastoreResult<()> {
    if !table_exists(conn, name).await? {
        return Ok(());
    }
    Err(match catalog.find_one(name)? {
        Some(_) => DatastoreError::schema("table_exists", format!("table '{}' already exists", name)),
        None => DatastoreError::schema("untracked_table", format!("table '{}' exists in the database but not in the catalog", name)),
    })
}

/// Record a freshly created table. A leftover document for a table that was not
/// physically present is replaced.
fn record_table<S: CatalogStore + ?Sized>(catalog: &S, table: &LogicalTable) -> DatastoreResult<()> {
    match catalog.insert_one(table.clone()) {
        Ok(()) => Ok(()),
        Err(CatalogError::Duplicate(_)) => {
            warn!(target: "datastore::ddl", "replacing stale catalog document for '{}'", table.name);
            catalog.delete_one(&table.name)?;
            catalog.insert_one(table.clone())?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Create a logical table: a plain table, or a merge table when partition keys are given.
pub async fn create_table<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    name: &str,
    columns: &[ColumnDef],
    partition_keys: &[String],
) -> DatastoreResult<LogicalTable> {
    let keys = declared_keys(name, columns, partition_keys)?;
    let stmt = Statement::create_table(name, columns, !keys.is_empty())?;
    reject_existing(conn, catalog, name).await?;

    exec(conn, &stmt).await?;
    commit(conn).await?;
    info!(target: "datastore::ddl", "CREATE TABLE {} partitioned={} keys={:?}", name, !keys.is_empty(), keys);

    let table = LogicalTable::new(name, columns.to_vec(), keys);
    record_table(catalog, &table)?;
    Ok(table)
}

/// Create an empty table shaped like `query` (`CREATE TABLE .. AS .. WITH NO DATA`).
/// The catalog entry carries no columns; the database owns the shape.
pub async fn create_table_as<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    name: &str,
    query: &str,
    params: &[Value],
) -> DatastoreResult<LogicalTable> {
    let stmt = Statement::create_table_as(name, query, params)?;
    reject_existing(conn, catalog, name).await?;

    exec(conn, &stmt).await?;
    commit(conn).await?;
    info!(target: "datastore::ddl", "CREATE TABLE {} AS <query> WITH NO DATA", name);

    let table = LogicalTable::new(name, Vec::new(), Vec::new());
    record_table(catalog, &table)?;
    Ok(table)
}

/// Drop a logical table and forget it. Returns whether a physical table was dropped.
/// Catalogued partitions are detached in the same transaction but not dropped; their
/// tables stay behind for the caller to remove.
pub async fn drop_table<C: Connection, S: CatalogStore + ?Sized>(conn: &mut C, catalog: &S, name: &str) -> DatastoreResult<bool> {
    let stmt = Statement::drop_table(name)?;
    let doc = catalog.find_one(name)?;
    let existed = table_exists(conn, name).await?;
    if existed {
        for part in doc.iter().filter(|t| t.is_partitioned).flat_map(|t| &t.partitions) {
            exec(conn, &Statement::detach_partition(name, &part.name)?).await?;
            debug!(target: "datastore::ddl", "detached {} from {} before drop", part.name, name);
        }
        exec(conn, &stmt).await?;
        commit(conn).await?;
        info!(target: "datastore::ddl", "DROP TABLE {}", name);
    }
    if catalog.delete_one(name)? {
        debug!(target: "datastore::ddl", "removed catalog document for '{}'", name);
    }
    Ok(existed)
}

/// Create the physical table backing a new partition. Left uncommitted; `add_partition`
/// commits it together with the attach.
pub async fn create_partition_table<C: Connection>(conn: &mut C, parent: &LogicalTable, partition_name: &str) -> DatastoreResult<()> {
    let stmt = Statement::create_table(partition_name, &parent.columns, false)?;
    exec(conn, &stmt).await?;
    debug!(target: "datastore::ddl", "CREATE TABLE {} (partition of {})", partition_name, parent.name);
    Ok(())
}

/// Attach a partition to its merge table, commit, then record it in the catalog.
pub async fn add_partition<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    parent: &str,
    partition_name: &str,
    key_values: &KeyValues,
) -> DatastoreResult<PartitionRef> {
    let stmt = Statement::attach_partition(parent, partition_name)?;
    exec(conn, &stmt).await?;
    commit(conn).await?;
    info!(target: "datastore::ddl", "ALTER TABLE {} ADD TABLE {} keys={:?}", parent, partition_name, key_values);

    let part = PartitionRef { name: partition_name.to_string(), key_values: key_values.clone() };
    if !catalog.update_one(parent, CatalogUpdate::Push(part.clone()))? {
        return Err(DatastoreError::catalog(
            "catalog_missing",
            format!("no catalog document for '{}' while recording partition '{}'", parent, partition_name),
        ));
    }
    Ok(part)
}

/// Detach a partition from its merge table, commit, then drop it from the catalog
/// (matched by key values).
pub async fn drop_partition<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    parent: &str,
    partition_name: &str,
    key_values: &KeyValues,
) -> DatastoreResult<()> {
    let stmt = Statement::detach_partition(parent, partition_name)?;
    exec(conn, &stmt).await?;
    commit(conn).await?;
    info!(target: "datastore::ddl", "ALTER TABLE {} DROP TABLE {}", parent, partition_name);

    if !catalog.update_one(parent, CatalogUpdate::Pull(key_values.clone()))? {
        warn!(target: "datastore::ddl", "catalog for '{}' had no partition with keys {:?}", parent, key_values);
    }
    Ok(())
}
