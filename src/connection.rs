//! Database connection abstraction.
//!
//! A `Connection` runs typed statements one at a time inside an implicit transaction
//! that stays open until `commit` or `rollback`. Backends:
//! - `memory`: in-process columnar engine, used by tests and local runs
//! - `postgres`: tokio-postgres client (feature `postgres`)

use std::future::Future;

use thiserror::Error;

use crate::sql::{CopyCommand, Statement};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryConnection, MemoryConnector, MemoryDatabase};
#[cfg(feature = "postgres")]
pub use postgres::{PgConnection, PgConnector};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DbError {
    /// The statement referenced a table or view that does not exist.
    #[error("relation not found: {0}")]
    RelationNotFound(String),
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

impl DbError {
    pub fn is_relation_not_found(&self) -> bool { matches!(self, DbError::RelationNotFound(_)) }
}

pub trait Connection: Send {
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&mut self, stmt: &Statement) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Run a query; yields the number of rows it returned.
    fn select(&mut self, stmt: &Statement) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Stream one bulk-copy chunk; yields the number of rows loaded.
    fn copy_in(&mut self, cmd: &CopyCommand) -> impl Future<Output = Result<u64, DbError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Liveness check used by the pool before handing out an idle connection.
    fn ping(&mut self) -> impl Future<Output = Result<(), DbError>> + Send {
        async move {
            self.select(&Statement::Ping).await?;
            Ok(())
        }
    }
}
