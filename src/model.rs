//! Logical table model shared by the catalog, DDL manager and router.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, DatastoreResult};
use crate::ident;
use crate::value::{Record, Value};

/// Partition-key column name -> the scalar every row in that partition shares.
pub type KeyValues = BTreeMap<String, Value>;

/// Column declaration; travels as a `[name, sql_type]` pair like the RPC `meta` argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self { name: name.into(), sql_type: sql_type.into() }
    }
}

impl From<(String, String)> for ColumnDef {
    fn from((name, sql_type): (String, String)) -> Self { Self { name, sql_type } }
}

impl From<ColumnDef> for (String, String) {
    fn from(c: ColumnDef) -> Self { (c.name, c.sql_type) }
}

/// One physical shard of a partitioned logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRef {
    pub name: String,
    pub key_values: KeyValues,
}

/// A logical table as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTable {
    pub name: String,
    /// Empty when the table was created from a query and its shape is owned by the database.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    pub is_partitioned: bool,
    #[serde(default)]
    pub partition_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub partitions: Vec<PartitionRef>,
}

impl LogicalTable {
    /// Build a new catalog entry; partitioning mode follows from `partition_keys`.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, partition_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_partitioned: !partition_keys.is_empty(),
            partition_keys,
            created_at: Utc::now(),
            partitions: Vec::new(),
        }
    }

    /// Stand-in for a physical table that predates the catalog. Treated as unpartitioned.
    pub fn untracked(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self::new(name, columns, Vec::new())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Declared partition key matching `name`, in its declared spelling.
    pub fn partition_key(&self, name: &str) -> Option<&str> {
        self.partition_keys.iter().find(|k| k.eq_ignore_ascii_case(name)).map(String::as_str)
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&PartitionRef> {
        self.partitions.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Reject columns the table does not declare. Tables without declared columns
    /// (created from a query) accept anything that is a valid identifier.
    pub fn check_columns<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> DatastoreResult<()> {
        for c in columns {
            ident::validate_column(c)?;
            if !self.columns.is_empty() && self.column(c).is_none() {
                return Err(DatastoreError::validation("unknown_column", format!("column '{}' is not declared on table '{}'", c, self.name)));
            }
        }
        Ok(())
    }

    pub fn check_record(&self, record: &Record) -> DatastoreResult<()> {
        if record.is_empty() {
            return Err(DatastoreError::validation("empty_record", format!("empty record for table '{}'", self.name)));
        }
        self.check_columns(record.columns())
    }

    /// Normalize caller-supplied key values to the declared key spelling; the key set
    /// must match the declared partition keys exactly.
    pub fn normalize_key_values(&self, supplied: &KeyValues) -> DatastoreResult<KeyValues> {
        let mut out = KeyValues::new();
        for (k, v) in supplied {
            let declared = self.partition_key(k).ok_or_else(|| {
                DatastoreError::validation("unknown_partition_key", format!("'{}' is not a partition key of '{}'", k, self.name))
            })?;
            out.insert(declared.to_string(), v.clone());
        }
        if out.len() != self.partition_keys.len() {
            return Err(DatastoreError::validation(
                "partition_key_mismatch",
                format!("expected values for partition keys {:?} of '{}'", self.partition_keys, self.name),
            ));
        }
        Ok(out)
    }
}

/// First-use creation arguments for a logical table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub partition_keys: Vec<String>,
}

impl TableSpec {
    pub fn plain(columns: Vec<ColumnDef>) -> Self { Self { columns, partition_keys: Vec::new() } }

    pub fn partitioned(columns: Vec<ColumnDef>, partition_keys: Vec<String>) -> Self { Self { columns, partition_keys } }

    pub fn wants_partitioning(&self) -> bool { !self.partition_keys.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn cols() -> Vec<ColumnDef> { vec![ColumnDef::new("ID", "INTEGER"), ColumnDef::new("VALUE", "VARCHAR(5)")] }

    #[test]
    fn partitioning_mode_follows_keys() {
        assert!(!LogicalTable::new("t", cols(), vec![]).is_partitioned);
        assert!(LogicalTable::new("t", cols(), vec!["ID".into()]).is_partitioned);
    }

    #[test]
    fn column_def_is_a_pair_on_the_wire() {
        let c: Vec<ColumnDef> = serde_json::from_str(r#"[["ID","INTEGER"],["VALUE","VARCHAR(5)"]]"#).unwrap();
        assert_eq!(c, cols());
        assert_eq!(serde_json::to_string(&c[0]).unwrap(), r#"["ID","INTEGER"]"#);
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let t = LogicalTable::new("t", cols(), vec![]);
        assert!(t.check_record(&record! { "id" => 1, "value" => "x" }).is_ok());
        let err = t.check_record(&record! { "ID" => 1, "OTHER" => 2 }).unwrap_err();
        assert_eq!(err.code_str(), "unknown_column");
        assert_eq!(t.check_record(&Record::new()).unwrap_err().code_str(), "empty_record");
    }

    #[test]
    fn query_shaped_tables_skip_column_checks() {
        let t = LogicalTable::new("t", vec![], vec![]);
        assert!(t.check_record(&record! { "anything" => 1 }).is_ok());
        assert!(t.check_record(&record! { "bad name" => 1 }).is_err());
    }

    #[test]
    fn key_values_normalize_to_declared_spelling() {
        let t = LogicalTable::new("t", cols(), vec!["ID".into()]);
        let mut kv = KeyValues::new();
        kv.insert("id".into(), Value::Int(1));
        let n = t.normalize_key_values(&kv).unwrap();
        assert_eq!(n.get("ID"), Some(&Value::Int(1)));

        let mut wrong = KeyValues::new();
        wrong.insert("VALUE".into(), Value::Int(1));
        assert!(t.normalize_key_values(&wrong).is_err());
        assert!(t.normalize_key_values(&KeyValues::new()).is_err());
    }
}
