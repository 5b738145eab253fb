//! Side catalog of logical tables.
//!
//! A document store keyed by logical table name (ASCII case-insensitive). The catalog
//! is written independently of the analytical database: there is no shared
//! transaction, so DDL code commits the physical change first and records it here
//! second.

use thiserror::Error;

use crate::model::{KeyValues, LogicalTable, PartitionRef};

pub mod file;
pub mod memory;

pub use file::FileCatalog;
pub use memory::MemoryCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog document already exists for '{0}'")]
    Duplicate(String),
    #[error("catalog document for '{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self { CatalogError::Unavailable(e.to_string()) }
}

/// Array mutation applied to a document's `partitions`.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogUpdate {
    /// Append a partition reference.
    Push(PartitionRef),
    /// Remove every partition reference whose key values equal these.
    Pull(KeyValues),
}

impl CatalogUpdate {
    /// Apply to an in-memory document; true when it changed.
    pub fn apply(&self, table: &mut LogicalTable) -> bool {
        match self {
            CatalogUpdate::Push(p) => {
                table.partitions.push(p.clone());
                true
            }
            CatalogUpdate::Pull(kv) => {
                let before = table.partitions.len();
                table.partitions.retain(|p| &p.key_values != kv);
                table.partitions.len() != before
            }
        }
    }
}

pub trait CatalogStore: Send + Sync {
    fn find_one(&self, name: &str) -> Result<Option<LogicalTable>, CatalogError>;

    /// Insert a new document; `Duplicate` if one already exists under that name.
    fn insert_one(&self, table: LogicalTable) -> Result<(), CatalogError>;

    /// True when a document was removed.
    fn delete_one(&self, name: &str) -> Result<bool, CatalogError>;

    /// True when a document was found and changed.
    fn update_one(&self, name: &str, update: CatalogUpdate) -> Result<bool, CatalogError>;
}

pub(crate) fn catalog_key(name: &str) -> String { name.to_ascii_lowercase() }
