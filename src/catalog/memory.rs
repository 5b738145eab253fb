//! Process-local catalog; contents are lost when the process exits.

use std::collections::HashMap as StdHashMap;

use crate::catalog::{catalog_key, CatalogError, CatalogStore, CatalogUpdate};
use crate::model::LogicalTable;

#[derive(Default)]
pub struct MemoryCatalog {
    docs: parking_lot::RwLock<StdHashMap<String, LogicalTable>>,
}

impl MemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.docs.read().len() }

    pub fn is_empty(&self) -> bool { self.docs.read().is_empty() }
}

impl CatalogStore for MemoryCatalog {
    fn find_one(&self, name: &str) -> Result<Option<LogicalTable>, CatalogError> {
        Ok(self.docs.read().get(&catalog_key(name)).cloned())
    }

    fn insert_one(&self, table: LogicalTable) -> Result<(), CatalogError> {
        let mut docs = self.docs.write();
        let key = catalog_key(&table.name);
        if docs.contains_key(&key) {
            return Err(CatalogError::Duplicate(table.name));
        }
        docs.insert(key, table);
        Ok(())
    }

    fn delete_one(&self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.docs.write().remove(&catalog_key(name)).is_some())
    }

    fn update_one(&self, name: &str, update: CatalogUpdate) -> Result<bool, CatalogError> {
        Ok(self.docs.write().get_mut(&catalog_key(name)).map(|t| update.apply(t)).unwrap_or(false))
    }
}
