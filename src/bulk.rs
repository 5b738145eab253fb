//! Bulk loader
//! -----------
//! Streams records into a non-partitioned table through the database's bulk-copy
//! channel. Records are encoded as `|`-separated lines (null as the empty string) in
//! declared column order and sent in chunks, each chunk one copy command with an
//! explicit record count. All chunks share one transaction.
//!
//! Values are not escaped: a value containing `|` or a newline corrupts its line.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::catalog::CatalogStore;
use crate::connection::Connection;
use crate::ddl::{commit, rollback_quietly};
use crate::error::{DatastoreError, DatastoreResult};
use crate::model::{ColumnDef, TableSpec};
use crate::router::{ensure_table, WriteContext, WriteOutcome};
use crate::sql::CopyCommand;
use crate::value::Record;

/// Declared column -> key to read from each record.
pub type ColumnMapping = BTreeMap<String, String>;

pub const DEFAULT_CHUNK_SIZE: usize = 2500;

fn source_key<'m>(mapping: &'m ColumnMapping, column: &'m str) -> &'m str {
    mapping
        .iter()
        .find(|(declared, _)| declared.eq_ignore_ascii_case(column))
        .map(|(_, source)| source.as_str())
        .unwrap_or(column)
}

/// Encode one record as a copy line.
pub fn encode_row(record: &Record, columns: &[String], mapping: &ColumnMapping) -> DatastoreResult<String> {
    let mut fields = Vec::with_capacity(columns.len());
    for c in columns {
        let key = source_key(mapping, c);
        let v = record
            .get(key)
            .ok_or_else(|| DatastoreError::key("missing_key", format!("record has no value for '{}' (column {})", key, c)))?;
        fields.push(v.copy_field());
    }
    Ok(fields.join("|"))
}

pub fn encode_rows(records: &[Record], columns: &[String], mapping: &ColumnMapping) -> DatastoreResult<Vec<String>> {
    records.iter().map(|r| encode_row(r, columns, mapping)).collect()
}

/// Split encoded lines into copy commands of at most `chunk_size` records.
pub fn chunk_commands(table: &str, columns: &[String], lines: &[String], chunk_size: usize) -> Vec<CopyCommand> {
    lines
        .chunks(chunk_size.max(1))
        .map(|chunk| CopyCommand { table: table.to_string(), columns: columns.to_vec(), count: chunk.len(), data: chunk.join("\n") })
        .collect()
}

pub async fn bulk_insert<C: Connection, S: CatalogStore + ?Sized>(
    conn: &mut C,
    ctx: &WriteContext<'_, S>,
    name: &str,
    records: &[Record],
    columns: &[ColumnDef],
    mapping: &ColumnMapping,
    chunk_size: usize,
) -> DatastoreResult<WriteOutcome> {
    if chunk_size == 0 {
        return Err(DatastoreError::validation("invalid_chunk_size", "chunk_size must be greater than zero"));
    }
    if let Some(t) = ctx.catalog.find_one(name)? {
        if t.is_partitioned {
            return Err(DatastoreError::not_supported(
                "partitioned_bulk_insert",
                format!("bulk insert is not supported on partitioned table '{}'", name),
            ));
        }
    }

    let (table, created) = ensure_table(conn, ctx, name, &TableSpec::plain(columns.to_vec())).await?;
    let order: Vec<String> = if columns.is_empty() { table.column_names() } else { columns.iter().map(|c| c.name.clone()).collect() };
    if order.is_empty() {
        return Err(DatastoreError::validation("missing_columns", format!("no column order known for '{}'", name)));
    }
    table.check_columns(order.iter().map(String::as_str))?;
    let lines = encode_rows(records, &order, mapping)?;

    let mut out = WriteOutcome { table_created: created, ..Default::default() };
    for cmd in chunk_commands(name, &order, &lines, chunk_size) {
        debug!(target: "datastore::bulk", "COPY {} RECORDS INTO {}", cmd.count, name);
        match conn.copy_in(&cmd).await {
            Ok(n) => out.inserted += n,
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(e.into());
            }
        }
    }
    if !lines.is_empty() {
        commit(conn).await?;
    }
    info!(target: "datastore::bulk", "BULK INSERT {}: {} row(s) in chunks of {}", name, out.inserted, chunk_size);
    Ok(out)
}
