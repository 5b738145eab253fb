//! RPC surface
//! -----------
//! Transport-independent decoding of named-argument calls into `Datastore` operations.
//! Argument names follow the long-standing service contract (`target_table`,
//! `records`, `meta`, ...). `records` may be a JSON object, an array of objects, or a
//! string holding either.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::bulk::ColumnMapping;
use crate::catalog::CatalogStore;
use crate::error::{DatastoreError, DatastoreResult};
use crate::model::{ColumnDef, KeyValues, TableSpec};
use crate::pool::Connector;
use crate::service::Datastore;
use crate::value::{Record, Value};

/// Every method `dispatch` understands.
pub const METHODS: &[&str] = &[
    "insert",
    "delete",
    "update",
    "upsert",
    "bulk_insert",
    "insert_from_select",
    "create_or_replace_view",
    "check_if_function_exists",
    "create_or_replace_python_function",
    "create_or_replace_function",
    "add_partition",
    "drop_partition",
    "create_table",
    "drop_table",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordsArg {
    Many(Vec<Record>),
    One(Record),
    Encoded(String),
}

impl RecordsArg {
    pub fn into_records(self) -> DatastoreResult<Vec<Record>> {
        match self {
            RecordsArg::Many(v) => Ok(v),
            RecordsArg::One(r) => Ok(vec![r]),
            RecordsArg::Encoded(s) => {
                let parsed: JsonValue = serde_json::from_str(&s)
                    .map_err(|e| DatastoreError::validation("invalid_records", format!("records string is not JSON: {}", e)))?;
                match parsed {
                    JsonValue::Array(_) => from_json(parsed),
                    JsonValue::Object(_) => Ok(vec![from_json(parsed)?]),
                    _ => Err(DatastoreError::validation("invalid_records", "records must be an object or an array of objects")),
                }
            }
        }
    }
}

fn from_json<T: DeserializeOwned>(v: JsonValue) -> DatastoreResult<T> {
    serde_json::from_value(v).map_err(|e| DatastoreError::validation("invalid_arguments", e.to_string()))
}

fn to_json<T: serde::Serialize>(v: &T) -> DatastoreResult<JsonValue> {
    serde_json::to_value(v).map_err(|e| DatastoreError::internal("encode_failed", e.to_string()))
}

#[derive(Deserialize)]
struct InsertArgs {
    target_table: String,
    records: RecordsArg,
    #[serde(default)]
    meta: Vec<ColumnDef>,
    #[serde(default)]
    partition_keys: Vec<String>,
}

#[derive(Deserialize)]
struct DeleteArgs {
    target_table: String,
    delete_keys: Record,
}

#[derive(Deserialize)]
struct UpdateArgs {
    target_table: String,
    #[serde(default)]
    key_filter: Option<Record>,
    #[serde(default)]
    changes: Option<Record>,
    #[serde(default)]
    update_key: Option<String>,
    #[serde(default)]
    records: Option<RecordsArg>,
}

#[derive(Deserialize)]
struct UpsertArgs {
    target_table: String,
    upsert_key: String,
    records: RecordsArg,
    #[serde(default)]
    meta: Vec<ColumnDef>,
    #[serde(default)]
    partition_keys: Vec<String>,
}

#[derive(Deserialize)]
struct BulkInsertArgs {
    target_table: String,
    records: RecordsArg,
    #[serde(default)]
    meta: Vec<ColumnDef>,
    #[serde(default)]
    mapping: ColumnMapping,
    #[serde(default)]
    chunk_size: Option<usize>,
}

#[derive(Deserialize)]
struct QueryArgs {
    target_table: String,
    query: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct ViewArgs {
    view_name: String,
    query: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct FunctionArgs {
    function_name: String,
    #[serde(default)]
    script: Option<String>,
}

#[derive(Deserialize)]
struct PartitionArgs {
    target_table: String,
    key_values: KeyValues,
}

#[derive(Deserialize)]
struct TableArgs {
    target_table: String,
    #[serde(default)]
    meta: Vec<ColumnDef>,
    #[serde(default)]
    partition_keys: Vec<String>,
}

/// Run `method` with JSON named arguments; the result is JSON.
pub async fn dispatch<K: Connector, S: CatalogStore>(ds: &Datastore<K, S>, method: &str, body: JsonValue) -> DatastoreResult<JsonValue> {
    debug!(target: "datastore::rpc", "dispatch {}", method);
    let body = if body.is_null() { json!({}) } else { body };
    match method {
        "insert" => {
            let a: InsertArgs = from_json(body)?;
            let spec = TableSpec::partitioned(a.meta, a.partition_keys);
            to_json(&ds.insert(&a.target_table, &a.records.into_records()?, &spec).await?)
        }
        "delete" => {
            let a: DeleteArgs = from_json(body)?;
            to_json(&ds.delete(&a.target_table, &a.delete_keys).await?)
        }
        "update" => {
            let a: UpdateArgs = from_json(body)?;
            match (a.key_filter, a.changes, a.update_key, a.records) {
                (Some(filter), Some(changes), None, None) => to_json(&ds.update(&a.target_table, &filter, &changes).await?),
                (None, None, Some(key), Some(records)) => to_json(&ds.update_many(&a.target_table, &key, &records.into_records()?).await?),
                _ => Err(DatastoreError::validation(
                    "invalid_arguments",
                    "update takes either key_filter and changes, or update_key and records",
                )),
            }
        }
        "upsert" => {
            let a: UpsertArgs = from_json(body)?;
            let spec = TableSpec::partitioned(a.meta, a.partition_keys);
            to_json(&ds.upsert(&a.target_table, &a.upsert_key, &a.records.into_records()?, &spec).await?)
        }
        "bulk_insert" => {
            let a: BulkInsertArgs = from_json(body)?;
            let records = a.records.into_records()?;
            to_json(&ds.bulk_insert(&a.target_table, &records, &a.meta, &a.mapping, a.chunk_size).await?)
        }
        "insert_from_select" => {
            let a: QueryArgs = from_json(body)?;
            to_json(&ds.insert_from_select(&a.target_table, &a.query, &a.params).await?)
        }
        "create_or_replace_view" => {
            let a: ViewArgs = from_json(body)?;
            let replaced = ds.create_or_replace_view(&a.view_name, &a.query, &a.params).await?;
            Ok(json!({ "replaced": replaced }))
        }
        "check_if_function_exists" => {
            let a: FunctionArgs = from_json(body)?;
            Ok(json!(ds.check_if_function_exists(&a.function_name).await?))
        }
        "create_or_replace_python_function" | "create_or_replace_function" => {
            let a: FunctionArgs = from_json(body)?;
            let script = a.script.ok_or_else(|| DatastoreError::validation("invalid_arguments", "missing field `script`"))?;
            let replaced = ds.create_or_replace_function(&a.function_name, &script).await?;
            Ok(json!({ "replaced": replaced }))
        }
        "add_partition" => {
            let a: PartitionArgs = from_json(body)?;
            let (partition, created) = ds.add_partition(&a.target_table, &a.key_values).await?;
            Ok(json!({ "partition": to_json(&partition)?, "created": created }))
        }
        "drop_partition" => {
            let a: PartitionArgs = from_json(body)?;
            let dropped = ds.drop_partition(&a.target_table, &a.key_values).await?;
            Ok(json!({ "partition": to_json(&dropped)? }))
        }
        "create_table" => {
            let a: TableArgs = from_json(body)?;
            to_json(&ds.create_table(&a.target_table, &a.meta, &a.partition_keys).await?)
        }
        "drop_table" => {
            let a: TableArgs = from_json(body)?;
            Ok(json!({ "dropped": ds.drop_table(&a.target_table).await? }))
        }
        other => Err(DatastoreError::validation("unknown_method", format!("unknown method '{}'", other))),
    }
}
