//! Directory-backed catalog: one pretty-printed JSON document per logical table at
//! `<dir>/<lowercased name>.json`. Writes go to a temp file first and are renamed into
//! place, so a crash leaves either the old or the new document.
//!
//! All file access is plain blocking `std::fs` on the calling thread. Documents are
//! small and each write is one file plus a rename; keep the directory on local disk.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{catalog_key, CatalogError, CatalogStore, CatalogUpdate};
use crate::model::LogicalTable;

pub struct FileCatalog {
    dir: PathBuf,
    // serialises read-modify-write cycles within this process
    write_lock: parking_lot::Mutex<()>,
}

impl FileCatalog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        debug!(target: "datastore::catalog", dir = %dir.display(), "opened file catalog");
        Ok(Self { dir, write_lock: parking_lot::Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn doc_path(&self, name: &str) -> PathBuf { self.dir.join(format!("{}.json", catalog_key(name))) }

    fn read(&self, name: &str) -> Result<Option<LogicalTable>, CatalogError> {
        let path = self.doc_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CatalogError::Corrupt { name: name.to_string(), reason: e.to_string() })
    }

    fn write(&self, table: &LogicalTable) -> Result<(), CatalogError> {
        let path = self.doc_path(&table.name);
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| CatalogError::Corrupt { name: table.name.clone(), reason: e.to_string() })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

impl CatalogStore for FileCatalog {
    fn find_one(&self, name: &str) -> Result<Option<LogicalTable>, CatalogError> { self.read(name) }

    fn insert_one(&self, table: LogicalTable) -> Result<(), CatalogError> {
        let _g = self.write_lock.lock();
        if self.doc_path(&table.name).exists() {
            return Err(CatalogError::Duplicate(table.name));
        }
        self.write(&table)
    }

    fn delete_one(&self, name: &str) -> Result<bool, CatalogError> {
        let _g = self.write_lock.lock();
        match std::fs::remove_file(self.doc_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn update_one(&self, name: &str, update: CatalogUpdate) -> Result<bool, CatalogError> {
        let _g = self.write_lock.lock();
        let Some(mut doc) = self.read(name)? else { return Ok(false) };
        if !update.apply(&mut doc) {
            return Ok(false);
        }
        self.write(&doc)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, KeyValues, PartitionRef};
    use crate::value::Value;

    #[test]
    fn documents_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let c = FileCatalog::open(tmp.path()).unwrap();
            c.insert_one(LogicalTable::new("Part_T", vec![ColumnDef::new("ID", "INTEGER")], vec!["ID".into()])).unwrap();
            let mut kv = KeyValues::new();
            kv.insert("ID".into(), Value::Int(7));
            assert!(c.update_one("part_t", CatalogUpdate::Push(PartitionRef { name: "Part_T_x".into(), key_values: kv })).unwrap());
        }
        let c = FileCatalog::open(tmp.path()).unwrap();
        let t = c.find_one("PART_T").unwrap().unwrap();
        assert_eq!(t.partitions.len(), 1);
        assert_eq!(t.partitions[0].key_values.get("ID"), Some(&Value::Int(7)));
        assert!(tmp.path().join("part_t.json").exists());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{not json").unwrap();
        let c = FileCatalog::open(tmp.path()).unwrap();
        assert!(matches!(c.find_one("bad"), Err(CatalogError::Corrupt { .. })));
    }

    #[test]
    fn duplicate_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FileCatalog::open(tmp.path()).unwrap();
        c.insert_one(LogicalTable::new("t", vec![], vec![])).unwrap();
        assert!(matches!(c.insert_one(LogicalTable::new("T", vec![], vec![])), Err(CatalogError::Duplicate(_))));
        assert!(c.find_one("other").unwrap().is_none());
        assert!(c.delete_one("t").unwrap());
        assert!(!c.delete_one("t").unwrap());
    }
}
