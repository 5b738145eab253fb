//! Unified datastore error model and mapping helpers.
//! Every caller-facing operation returns `DatastoreResult`; lower layers (connections,
//! catalog backends) raise their own `thiserror` types which are folded in here.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::catalog::CatalogError;
use crate::connection::DbError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatastoreError {
    /// Table or partition DDL inconsistency (e.g. creating over an untracked table).
    Schema { code: String, message: String },
    /// Malformed caller input: bad identifiers, unknown columns, wrong key sets.
    Validation { code: String, message: String },
    /// A required key column is missing from a record.
    Key { code: String, message: String },
    /// Operation not available for the table's partitioning mode.
    NotSupported { code: String, message: String },
    /// Statement failure in the analytical database.
    Database { code: String, message: String },
    /// Catalog store unreachable or inconsistent.
    Catalog { code: String, message: String },
    Internal { code: String, message: String },
}

impl DatastoreError {
    pub fn code_str(&self) -> &str {
        match self {
            DatastoreError::Schema { code, .. }
            | DatastoreError::Validation { code, .. }
            | DatastoreError::Key { code, .. }
            | DatastoreError::NotSupported { code, .. }
            | DatastoreError::Database { code, .. }
            | DatastoreError::Catalog { code, .. }
            | DatastoreError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DatastoreError::Schema { message, .. }
            | DatastoreError::Validation { message, .. }
            | DatastoreError::Key { message, .. }
            | DatastoreError::NotSupported { message, .. }
            | DatastoreError::Database { message, .. }
            | DatastoreError::Catalog { message, .. }
            | DatastoreError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn schema(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Schema { code: code.into(), message: msg.into() } }
    pub fn validation(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Validation { code: code.into(), message: msg.into() } }
    pub fn key(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Key { code: code.into(), message: msg.into() } }
    pub fn not_supported(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::NotSupported { code: code.into(), message: msg.into() } }
    pub fn database(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Database { code: code.into(), message: msg.into() } }
    pub fn catalog(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Catalog { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { DatastoreError::Internal { code: code.into(), message: msg.into() } }

    pub fn is_not_supported(&self) -> bool { matches!(self, DatastoreError::NotSupported { .. }) }

    /// Map to HTTP status code for the RPC binding.
    pub fn http_status(&self) -> u16 {
        match self {
            DatastoreError::Schema { .. } => 409,
            DatastoreError::Validation { .. } => 400,
            DatastoreError::Key { .. } => 400,
            DatastoreError::NotSupported { .. } => 405,
            DatastoreError::Database { .. } => 422,
            DatastoreError::Catalog { .. } => 503,
            DatastoreError::Internal { .. } => 500,
        }
    }
}

impl Display for DatastoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for DatastoreError {}

pub type DatastoreResult<T> = Result<T, DatastoreError>;

impl From<DbError> for DatastoreError {
    fn from(err: DbError) -> Self {
        let code = match &err {
            DbError::RelationNotFound(_) => "relation_not_found",
            DbError::Statement(_) => "statement_failed",
            DbError::Connection(_) => "connection_failed",
        };
        DatastoreError::Database { code: code.into(), message: err.to_string() }
    }
}

impl From<CatalogError> for DatastoreError {
    fn from(err: CatalogError) -> Self {
        let code = match &err {
            CatalogError::Unavailable(_) => "catalog_unavailable",
            CatalogError::Duplicate(_) => "catalog_duplicate",
            CatalogError::Corrupt { .. } => "catalog_corrupt",
        };
        DatastoreError::Catalog { code: code.into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for DatastoreError {
    fn from(err: anyhow::Error) -> Self {
        DatastoreError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
