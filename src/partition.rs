//! Partition resolver
//! ------------------
//! Maps a record of a partitioned logical table to the physical partition holding its
//! key-value combination, creating and attaching a new partition on first sight.
//!
//! Lookups go cache -> catalog document -> create. The cache lives for one write batch
//! and is passed explicitly. Creation for a given logical table is serialised through
//! `PartitionLocks`, and the catalog document is re-read once the lock is held, so two
//! concurrent batches never create two partitions for the same key values.

use std::collections::HashMap as StdHashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::connection::Connection;
use crate::ddl;
use crate::error::{DatastoreError, DatastoreResult};
use crate::ident;
use crate::model::{KeyValues, LogicalTable, PartitionRef};
use crate::value::{Record, Value};

/// Separates key values inside a fingerprint (ASCII unit separator).
const FINGERPRINT_SEP: char = '\u{1f}';
const NAME_PREFIX_MAX: usize = 24;

/// How a record's key values are matched against known partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchPolicy {
    /// First partition sharing a value on any single key wins.
    #[default]
    #[serde(rename = "any")]
    AnyKey,
    /// Partition key values must all be equal.
    #[serde(rename = "exact")]
    AllKeys,
}

impl FromStr for MatchPolicy {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "any_key" => Ok(MatchPolicy::AnyKey),
            "exact" | "all" | "all_keys" => Ok(MatchPolicy::AllKeys),
            other => Err(DatastoreError::validation("invalid_partition_match", format!("unknown partition match policy '{}'", other))),
        }
    }
}

/// Requested partition keys for an existing table must name exactly the declared keys.
/// An empty request means "whatever the table already uses".
pub fn validate_partition_keys(table: &LogicalTable, requested: &[String]) -> DatastoreResult<()> {
    if requested.is_empty() {
        return Ok(());
    }
    let same = requested.len() == table.partition_keys.len() && requested.iter().all(|r| table.partition_key(r).is_some());
    if !same {
        return Err(DatastoreError::validation(
            "partition_key_mismatch",
            format!("requested partition keys {:?} do not match {:?} declared for '{}'", requested, table.partition_keys, table.name),
        ));
    }
    Ok(())
}

/// The record's values for the table's partition keys.
pub fn key_values(table: &LogicalTable, record: &Record) -> DatastoreResult<KeyValues> {
    let mut kv = KeyValues::new();
    for k in &table.partition_keys {
        let v = record
            .get(k)
            .ok_or_else(|| DatastoreError::key("missing_key", format!("record for '{}' has no value for partition key '{}'", table.name, k)))?;
        kv.insert(k.clone(), v.clone());
    }
    Ok(kv)
}

/// Cache key for a key-value combination, in declared key order.
pub fn fingerprint(table: &LogicalTable, kv: &KeyValues) -> String {
    let mut out = String::new();
    for (i, k) in table.partition_keys.iter().enumerate() {
        if i > 0 {
            out.push(FINGERPRINT_SEP);
        }
        match kv.get(k) {
            Some(Value::Null) | None => out.push('\0'),
            Some(v) => out.push_str(&v.to_string()),
        }
    }
    out
}

/// Fingerprint -> physical partition name, valid for one write batch.
#[derive(Debug, Default)]
pub struct PartitionCache {
    map: StdHashMap<String, String>,
}

impl PartitionCache {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, fingerprint: &str) -> Option<&str> { self.map.get(fingerprint).map(String::as_str) }

    pub fn insert(&mut self, fingerprint: String, partition: String) { self.map.insert(fingerprint, partition); }

    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }
}

/// Known partition matching `kv` under `policy`.
pub fn find_partition<'a>(table: &'a LogicalTable, kv: &KeyValues, policy: MatchPolicy) -> Option<&'a PartitionRef> {
    match policy {
        // an exact tuple (NULLs included) always wins over a shared value
        MatchPolicy::AnyKey => table.partitions.iter().find(|p| &p.key_values == kv).or_else(|| {
            table
                .partitions
                .iter()
                .find(|p| kv.iter().any(|(k, v)| !v.is_null() && p.key_values.get(k) == Some(v)))
        }),
        MatchPolicy::AllKeys => table.partitions.iter().find(|p| &p.key_values == kv),
    }
}

/// Opaque physical name for a new partition: `<parent>_<uuid>`, kept in the parent's schema.
pub fn new_partition_name(table: &LogicalTable) -> String {
    let (schema, bare) = ident::split_relation(&table.name);
    let prefix: String = bare.chars().take(NAME_PREFIX_MAX).collect();
    loop {
        let name = match schema {
            Some(s) => format!("{}.{}_{}", s, prefix, Uuid::new_v4().simple()),
            None => format!("{}_{}", prefix, Uuid::new_v4().simple()),
        };
        if table.partition_by_name(&name).is_none() {
            return name;
        }
    }
}

/// Physical partition for `record`, creating and attaching one if none matches.
/// New partitions are appended to `table` so later records in the batch see them.
pub async fn resolve_partition<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    table: &mut LogicalTable,
    record: &Record,
    cache: &mut PartitionCache,
    policy: MatchPolicy,
) -> DatastoreResult<(String, bool)> {
    let kv = key_values(table, record)?;
    let fp = fingerprint(table, &kv);
    if let Some(name) = cache.get(&fp) {
        return Ok((name.to_string(), false));
    }
    if let Some(p) = find_partition(table, &kv, policy) {
        debug!(target: "datastore::partition", "{}: keys {:?} -> existing partition {}", table.name, kv, p.name);
        cache.insert(fp, p.name.clone());
        return Ok((p.name.clone(), false));
    }

    let name = new_partition_name(table);
    ddl::create_partition_table(conn, table, &name).await?;
    let part = ddl::add_partition(conn, catalog, &table.name, &name, &kv).await?;
    info!(target: "datastore::partition", "{}: created partition {} for keys {:?}", table.name, name, kv);
    table.partitions.push(part);
    cache.insert(fp, name.clone());
    Ok((name, true))
}

/// Per-logical-table async locks around resolve-or-create.
#[derive(Default)]
pub struct PartitionLocks {
    inner: parking_lot::Mutex<StdHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    pub fn new() -> Self { Self::default() }

    pub async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(table.to_ascii_lowercase()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Partition assignment for one batch of records.
#[derive(Debug)]
pub struct ResolvedBatch {
    /// Catalog document as of the end of resolution.
    pub table: LogicalTable,
    /// Physical target per record, in record order.
    pub targets: Vec<String>,
    pub created: usize,
}

/// Resolve every record of a batch under the table's lock, reading the catalog
/// document fresh once the lock is held.
pub async fn resolve_batch<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    catalog: &S,
    locks: &PartitionLocks,
    table_name: &str,
    records: &[Record],
    policy: MatchPolicy,
) -> DatastoreResult<ResolvedBatch> {
    let _guard = locks.acquire(table_name).await;
    let mut table = catalog.find_one(table_name)?.ok_or_else(|| {
        DatastoreError::schema("untracked_table", format!("partitioned table '{}' has no catalog document", table_name))
    })?;
    let mut cache = PartitionCache::new();
    let mut targets = Vec::with_capacity(records.len());
    let mut created = 0;
    for r in records {
        let (name, new) = resolve_partition(conn, catalog, &mut table, r, &mut cache, policy).await?;
        if new {
            created += 1;
        }
        targets.push(name);
    }
    Ok(ResolvedBatch { table, targets, created })
}
