//! Partitioned-table data access over a columnar analytical database, with a side
//! catalog of logical tables.

pub mod error;
pub mod ident;
pub mod value;
pub mod model;
pub mod sql;
pub mod connection;
pub mod pool;
pub mod catalog;
pub mod ddl;
pub mod partition;
pub mod router;
pub mod bulk;
pub mod views;
pub mod service;
pub mod rpc;
pub mod server;
pub mod config;

pub use error::{DatastoreError, DatastoreResult};
pub use model::{ColumnDef, KeyValues, LogicalTable, PartitionRef, TableSpec};
pub use service::{Datastore, DatastoreOptions};
pub use value::{Record, Value};
