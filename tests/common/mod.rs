#![allow(dead_code)]

use std::sync::Arc;

use datastore::catalog::{CatalogError, CatalogStore, CatalogUpdate, MemoryCatalog};
use datastore::connection::{MemoryConnector, MemoryDatabase};
use datastore::partition::MatchPolicy;
use datastore::pool::Pool;
use datastore::{ColumnDef, Datastore, DatastoreOptions, LogicalTable, TableSpec};

pub type MemDatastore<S = MemoryCatalog> = Datastore<MemoryConnector, S>;

pub fn id_value_columns() -> Vec<ColumnDef> {
    vec![ColumnDef::new("ID", "INTEGER"), ColumnDef::new("VALUE", "VARCHAR(5)")]
}

pub fn plain_spec() -> TableSpec { TableSpec::plain(id_value_columns()) }

pub fn partitioned_spec() -> TableSpec { TableSpec::partitioned(id_value_columns(), vec!["ID".to_string()]) }

pub fn datastore_with<S: CatalogStore + 'static>(catalog: S, policy: MatchPolicy) -> (MemoryDatabase, Arc<S>, MemDatastore<S>) {
    let db = MemoryDatabase::new();
    let catalog = Arc::new(catalog);
    let options = DatastoreOptions { partition_match: policy, ..Default::default() };
    let ds = Datastore::new(Pool::new(db.connector(), 4), catalog.clone(), options);
    (db, catalog, ds)
}

pub fn datastore() -> (MemoryDatabase, Arc<MemoryCatalog>, MemDatastore) {
    datastore_with(MemoryCatalog::new(), MatchPolicy::AnyKey)
}

/// Catalog wrapper whose partition pushes can be made to fail.
#[derive(Default)]
pub struct FlakyCatalog {
    pub inner: MemoryCatalog,
    pub fail_updates: parking_lot::Mutex<bool>,
}

impl CatalogStore for FlakyCatalog {
    fn find_one(&self, name: &str) -> Result<Option<LogicalTable>, CatalogError> { self.inner.find_one(name) }

    fn insert_one(&self, table: LogicalTable) -> Result<(), CatalogError> { self.inner.insert_one(table) }

    fn delete_one(&self, name: &str) -> Result<bool, CatalogError> { self.inner.delete_one(name) }

    fn update_one(&self, name: &str, update: CatalogUpdate) -> Result<bool, CatalogError> {
        if *self.fail_updates.lock() {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        self.inner.update_one(name, update)
    }
}
