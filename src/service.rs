//! `Datastore`: the operation surface. Each call checks one connection out of the pool,
//! runs the operation on it and hands it back.

use std::sync::Arc;

use crate::bulk::{self, ColumnMapping, DEFAULT_CHUNK_SIZE};
use crate::catalog::CatalogStore;
use crate::connection::Connection;
use crate::ddl;
use crate::error::{DatastoreError, DatastoreResult};
use crate::model::{ColumnDef, KeyValues, LogicalTable, PartitionRef, TableSpec};
use crate::partition::{self, MatchPolicy, PartitionLocks};
use crate::pool::{Connector, Pool, PooledConnection};
use crate::router::{self, WriteContext, WriteOutcome};
use crate::value::{Record, Value};
use crate::views;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatastoreOptions {
    pub partition_match: MatchPolicy,
    /// Chunk size used when a bulk insert does not name one.
    pub bulk_chunk_size: usize,
}

impl Default for DatastoreOptions {
    fn default() -> Self { Self { partition_match: MatchPolicy::default(), bulk_chunk_size: DEFAULT_CHUNK_SIZE } }
}

pub struct Datastore<K: Connector, S: CatalogStore> {
    pool: Pool<K>,
    catalog: Arc<S>,
    options: DatastoreOptions,
    locks: PartitionLocks,
}

/// Close whatever transaction the operation left open (a read-only probe, or work
/// abandoned on an error path) before the connection goes back to the pool.
async fn settle<C: Connection, T>(conn: &mut C, res: DatastoreResult<T>) -> DatastoreResult<T> {
    ddl::rollback_quietly(conn).await;
    res
}

impl<K: Connector, S: CatalogStore> Datastore<K, S> {
    pub fn new(pool: Pool<K>, catalog: Arc<S>, options: DatastoreOptions) -> Self {
        Self { pool, catalog, options, locks: PartitionLocks::new() }
    }

    pub fn catalog(&self) -> &S { &self.catalog }

    pub fn pool(&self) -> &Pool<K> { &self.pool }

    pub fn options(&self) -> &DatastoreOptions { &self.options }

    async fn conn(&self) -> DatastoreResult<PooledConnection<K>> { Ok(self.pool.get().await?) }

    fn ctx(&self) -> WriteContext<'_, S> { WriteContext::new(self.catalog.as_ref(), &self.locks, self.options.partition_match) }

    /// Catalog document of a partitioned table, for partition maintenance calls.
    fn partitioned_table(&self, name: &str) -> DatastoreResult<LogicalTable> {
        let table = self
            .catalog
            .find_one(name)?
            .ok_or_else(|| DatastoreError::schema("untracked_table", format!("table '{}' is not in the catalog", name)))?;
        if !table.is_partitioned {
            return Err(DatastoreError::not_supported("not_partitioned", format!("table '{}' is not partitioned", name)));
        }
        Ok(table)
    }

    pub async fn create_table(&self, name: &str, columns: &[ColumnDef], partition_keys: &[String]) -> DatastoreResult<LogicalTable> {
        let mut conn = self.conn().await?;
        let res = ddl::create_table(&mut *conn, self.catalog.as_ref(), name, columns, partition_keys).await;
        settle(&mut *conn, res).await
    }

    pub async fn drop_table(&self, name: &str) -> DatastoreResult<bool> {
        let mut conn = self.conn().await?;
        let res = ddl::drop_table(&mut *conn, self.catalog.as_ref(), name).await;
        settle(&mut *conn, res).await
    }

    pub async fn insert(&self, name: &str, records: &[Record], spec: &TableSpec) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::insert(&mut *conn, &self.ctx(), name, records, spec).await;
        settle(&mut *conn, res).await
    }

    pub async fn delete(&self, name: &str, key_filter: &Record) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::delete(&mut *conn, &self.ctx(), name, key_filter).await;
        settle(&mut *conn, res).await
    }

    pub async fn update(&self, name: &str, key_filter: &Record, changes: &Record) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::update(&mut *conn, &self.ctx(), name, key_filter, changes).await;
        settle(&mut *conn, res).await
    }

    pub async fn update_many(&self, name: &str, key: &str, records: &[Record]) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::update_many(&mut *conn, &self.ctx(), name, key, records).await;
        settle(&mut *conn, res).await
    }

    pub async fn upsert(&self, name: &str, key: &str, records: &[Record], spec: &TableSpec) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::upsert(&mut *conn, &self.ctx(), name, key, records, spec).await;
        settle(&mut *conn, res).await
    }

    pub async fn bulk_insert(
        &self,
        name: &str,
        records: &[Record],
        columns: &[ColumnDef],
        mapping: &ColumnMapping,
        chunk_size: Option<usize>,
    ) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let chunk = chunk_size.unwrap_or(self.options.bulk_chunk_size);
        let res = bulk::bulk_insert(&mut *conn, &self.ctx(), name, records, columns, mapping, chunk).await;
        settle(&mut *conn, res).await
    }

    pub async fn insert_from_select(&self, name: &str, query: &str, params: &[Value]) -> DatastoreResult<WriteOutcome> {
        let mut conn = self.conn().await?;
        let res = router::insert_from_select(&mut *conn, &self.ctx(), name, query, params).await;
        settle(&mut *conn, res).await
    }

    pub async fn create_or_replace_view(&self, name: &str, query: &str, params: &[Value]) -> DatastoreResult<bool> {
        let mut conn = self.conn().await?;
        let res = views::create_or_replace_view(&mut *conn, name, query, params).await;
        settle(&mut *conn, res).await
    }

    pub async fn check_if_function_exists(&self, name: &str) -> DatastoreResult<bool> {
        let mut conn = self.conn().await?;
        let res = views::check_if_function_exists(&mut *conn, name).await;
        settle(&mut *conn, res).await
    }

    pub async fn create_or_replace_function(&self, name: &str, script: &str) -> DatastoreResult<bool> {
        let mut conn = self.conn().await?;
        let res = views::create_or_replace_function(&mut *conn, name, script).await;
        settle(&mut *conn, res).await
    }

    /// Create and attach the partition for `key_values` unless one already matches them
    /// exactly. Returns the partition and whether it was created.
    pub async fn add_partition(&self, name: &str, key_values: &KeyValues) -> DatastoreResult<(PartitionRef, bool)> {
        let table = self.partitioned_table(name)?;
        let kv = table.normalize_key_values(key_values)?;
        let mut conn = self.conn().await?;
        let _guard = self.locks.acquire(name).await;
        let table = self.partitioned_table(name)?;
        if let Some(p) = partition::find_partition(&table, &kv, MatchPolicy::AllKeys) {
            return Ok((p.clone(), false));
        }
        let part_name = partition::new_partition_name(&table);
        if let Err(e) = ddl::create_partition_table(&mut *conn, &table, &part_name).await {
            return settle(&mut *conn, Err(e)).await;
        }
        let res = ddl::add_partition(&mut *conn, self.catalog.as_ref(), name, &part_name, &kv).await;
        Ok((settle(&mut *conn, res).await?, true))
    }

    /// Detach the partition matching `key_values` exactly. The physical table is kept.
    pub async fn drop_partition(&self, name: &str, key_values: &KeyValues) -> DatastoreResult<Option<PartitionRef>> {
        let table = self.partitioned_table(name)?;
        let kv = table.normalize_key_values(key_values)?;
        let mut conn = self.conn().await?;
        let _guard = self.locks.acquire(name).await;
        let table = self.partitioned_table(name)?;
        let Some(part) = partition::find_partition(&table, &kv, MatchPolicy::AllKeys).cloned() else {
            return Ok(None);
        };
        let res = ddl::drop_partition(&mut *conn, self.catalog.as_ref(), name, &part.name, &part.key_values).await;
        settle(&mut *conn, res).await?;
        Ok(Some(part))
    }
}
