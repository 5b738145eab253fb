//! Statement building
//! ------------------
//! Every statement the datastore issues is built here as a typed `Statement`, with
//! identifiers checked against the allow-list in `ident` and values kept apart as bind
//! parameters. A statement renders to text per `Dialect`; the in-process engine reads
//! the typed form directly.
//!
//! Caller-supplied query bodies (views, insert-from-select, function scripts) are the
//! one place raw SQL passes through, because carrying a query is what those operations
//! are for.

use crate::error::{DatastoreError, DatastoreResult};
use crate::ident;
use crate::model::ColumnDef;
use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// MonetDB: merge tables, `%s` placeholders, `COPY n RECORDS INTO`.
    MonetDb,
    /// PostgreSQL: merge tables emulated with table inheritance, `$n` placeholders.
    Postgres,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Ping,
    /// Bounded existence probe: `SELECT 1 FROM t LIMIT 1`.
    Probe { table: String },
    CreateTable { table: String, columns: Vec<ColumnDef> },
    CreateMergeTable { table: String, columns: Vec<ColumnDef> },
    CreateTableAs { table: String, query: String, params: Vec<Value> },
    DropTable { table: String },
    AttachPartition { parent: String, partition: String },
    DetachPartition { parent: String, partition: String },
    Insert { table: String, columns: Vec<String>, values: Vec<Value> },
    InsertSelect { table: String, query: String, params: Vec<Value> },
    Update { table: String, assignments: Vec<(String, Value)>, key: String, key_value: Value },
    Delete { table: String, key: String, key_value: Value },
    SelectByKey { table: String, key: String, key_value: Value },
    CreateView { view: String, query: String, params: Vec<Value> },
    DropView { view: String },
    FunctionExists { name: String },
    DropFunction { name: String },
    /// Caller-supplied `CREATE FUNCTION` script, run verbatim.
    CreateFunction { name: String, script: String },
}

/// Statement text plus the values to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Placeholders { dialect: Dialect, n: usize }

impl Placeholders {
    fn new(dialect: Dialect) -> Self { Self { dialect, n: 0 } }
    fn next(&mut self) -> String {
        self.n += 1;
        match self.dialect {
            Dialect::MonetDb => "%s".to_string(),
            Dialect::Postgres => format!("${}", self.n),
        }
    }
}

fn column_list(columns: &[ColumnDef]) -> String {
    columns.iter().map(|c| format!("{} {}", c.name, c.sql_type.trim())).collect::<Vec<_>>().join(", ")
}

/// Substitute `$n` placeholders with literals, for statements PostgreSQL will not
/// parameterize (DDL with a query body). Highest indexes are matched greedily so `$10`
/// never reads as `$1` followed by `0`.
pub fn inline_params(query: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(query.len());
    let chars: Vec<char> = query.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() { j += 1; }
            if j > i + 1 {
                let idx: usize = chars[i + 1..j].iter().collect::<String>().parse().unwrap_or(0);
                if idx >= 1 && idx <= params.len() {
                    out.push_str(&params[idx - 1].to_sql_literal());
                    i = j;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

impl Statement {
    pub fn probe(table: &str) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        Ok(Statement::Probe { table: table.to_string() })
    }

    pub fn create_table(table: &str, columns: &[ColumnDef], merge: bool) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        if columns.is_empty() {
            return Err(DatastoreError::validation("missing_columns", format!("no columns declared for table '{}'", table)));
        }
        for c in columns {
            ident::validate_column(&c.name)?;
            ident::validate_sql_type(&c.sql_type)?;
        }
        let (table, columns) = (table.to_string(), columns.to_vec());
        Ok(if merge { Statement::CreateMergeTable { table, columns } } else { Statement::CreateTable { table, columns } })
    }

    pub fn create_table_as(table: &str, query: &str, params: &[Value]) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        Ok(Statement::CreateTableAs { table: table.to_string(), query: query.trim().to_string(), params: params.to_vec() })
    }

    pub fn drop_table(table: &str) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        Ok(Statement::DropTable { table: table.to_string() })
    }

    pub fn attach_partition(parent: &str, partition: &str) -> DatastoreResult<Self> {
        ident::validate_relation("table", parent)?;
        ident::validate_relation("partition", partition)?;
        Ok(Statement::AttachPartition { parent: parent.to_string(), partition: partition.to_string() })
    }

    pub fn detach_partition(parent: &str, partition: &str) -> DatastoreResult<Self> {
        ident::validate_relation("table", parent)?;
        ident::validate_relation("partition", partition)?;
        Ok(Statement::DetachPartition { parent: parent.to_string(), partition: partition.to_string() })
    }

    pub fn insert(table: &str, record: &Record) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        if record.is_empty() {
            return Err(DatastoreError::validation("empty_record", format!("empty record for table '{}'", table)));
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (c, v) in record.iter() {
            ident::validate_column(c)?;
            columns.push(c.to_string());
            values.push(v.clone());
        }
        Ok(Statement::Insert { table: table.to_string(), columns, values })
    }

    pub fn insert_select(table: &str, query: &str, params: &[Value]) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        Ok(Statement::InsertSelect { table: table.to_string(), query: query.trim().to_string(), params: params.to_vec() })
    }

    pub fn update(table: &str, changes: &Record, key: &str, key_value: Value) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        ident::validate_column(key)?;
        if changes.is_empty() {
            return Err(DatastoreError::validation("empty_changes", format!("no columns to update on '{}'", table)));
        }
        let mut assignments = Vec::with_capacity(changes.len());
        for (c, v) in changes.iter() {
            ident::validate_column(c)?;
            assignments.push((c.to_string(), v.clone()));
        }
        Ok(Statement::Update { table: table.to_string(), assignments, key: key.to_string(), key_value })
    }

    pub fn delete(table: &str, key: &str, key_value: Value) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        ident::validate_column(key)?;
        Ok(Statement::Delete { table: table.to_string(), key: key.to_string(), key_value })
    }

    pub fn select_by_key(table: &str, key: &str, key_value: Value) -> DatastoreResult<Self> {
        ident::validate_relation("table", table)?;
        ident::validate_column(key)?;
        Ok(Statement::SelectByKey { table: table.to_string(), key: key.to_string(), key_value })
    }

    pub fn create_view(view: &str, query: &str, params: &[Value]) -> DatastoreResult<Self> {
        ident::validate_relation("view", view)?;
        Ok(Statement::CreateView { view: view.to_string(), query: query.trim().to_string(), params: params.to_vec() })
    }

    pub fn drop_view(view: &str) -> DatastoreResult<Self> {
        ident::validate_relation("view", view)?;
        Ok(Statement::DropView { view: view.to_string() })
    }

    pub fn function_exists(name: &str) -> DatastoreResult<Self> {
        ident::validate_relation("function", name)?;
        Ok(Statement::FunctionExists { name: name.to_string() })
    }

    pub fn drop_function(name: &str) -> DatastoreResult<Self> {
        ident::validate_relation("function", name)?;
        Ok(Statement::DropFunction { name: name.to_string() })
    }

    pub fn create_function(name: &str, script: &str) -> DatastoreResult<Self> {
        ident::validate_relation("function", name)?;
        if script.trim().is_empty() {
            return Err(DatastoreError::validation("empty_script", format!("empty script for function '{}'", name)));
        }
        let bare = ident::split_relation(name).1.to_ascii_lowercase();
        if !script.to_ascii_lowercase().contains(&bare) {
            return Err(DatastoreError::validation("function_name_mismatch", format!("script does not define function '{}'", name)));
        }
        Ok(Statement::CreateFunction { name: name.to_string(), script: script.trim().to_string() })
    }

    /// The relation this statement reads or writes, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Statement::Ping | Statement::FunctionExists { .. } | Statement::DropFunction { .. } | Statement::CreateFunction { .. } => None,
            Statement::Probe { table }
            | Statement::CreateTable { table, .. }
            | Statement::CreateMergeTable { table, .. }
            | Statement::CreateTableAs { table, .. }
            | Statement::DropTable { table }
            | Statement::Insert { table, .. }
            | Statement::InsertSelect { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::SelectByKey { table, .. } => Some(table),
            Statement::AttachPartition { partition, .. } | Statement::DetachPartition { partition, .. } => Some(partition),
            Statement::CreateView { view, .. } | Statement::DropView { view } => Some(view),
        }
    }

    pub fn render(&self, dialect: Dialect) -> Rendered {
        let mut ph = Placeholders::new(dialect);
        let pg = dialect == Dialect::Postgres;
        let (sql, params) = match self {
            Statement::Ping => ("SELECT 1".to_string(), vec![]),
            Statement::Probe { table } => (format!("SELECT 1 FROM {} LIMIT 1", table), vec![]),
            Statement::CreateTable { table, columns } => (format!("CREATE TABLE {} ({})", table, column_list(columns)), vec![]),
            Statement::CreateMergeTable { table, columns } => {
                let kw = if pg { "CREATE TABLE" } else { "CREATE MERGE TABLE" };
                (format!("{} {} ({})", kw, table, column_list(columns)), vec![])
            }
            Statement::CreateTableAs { table, query, params } => {
                if pg {
                    (format!("CREATE TABLE {} AS {} WITH NO DATA", table, inline_params(query, params)), vec![])
                } else {
                    (format!("CREATE TABLE {} AS {} WITH NO DATA", table, query), params.clone())
                }
            }
            Statement::DropTable { table } => (format!("DROP TABLE {}", table), vec![]),
            Statement::AttachPartition { parent, partition } => {
                if pg { (format!("ALTER TABLE {} INHERIT {}", partition, parent), vec![]) }
                else { (format!("ALTER TABLE {} ADD TABLE {}", parent, partition), vec![]) }
            }
            Statement::DetachPartition { parent, partition } => {
                if pg { (format!("ALTER TABLE {} NO INHERIT {}", partition, parent), vec![]) }
                else { (format!("ALTER TABLE {} DROP TABLE {}", parent, partition), vec![]) }
            }
            Statement::Insert { table, columns, values } => {
                let marks: Vec<String> = values.iter().map(|_| ph.next()).collect();
                (format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), marks.join(", ")), values.clone())
            }
            Statement::InsertSelect { table, query, params } => (format!("INSERT INTO {} {}", table, query), params.clone()),
            Statement::Update { table, assignments, key, key_value } => {
                let sets: Vec<String> = assignments.iter().map(|(c, _)| format!("{} = {}", c, ph.next())).collect();
                let mut params: Vec<Value> = assignments.iter().map(|(_, v)| v.clone()).collect();
                params.push(key_value.clone());
                (format!("UPDATE {} SET {} WHERE {} = {}", table, sets.join(", "), key, ph.next()), params)
            }
            Statement::Delete { table, key, key_value } => (format!("DELETE FROM {} WHERE {} = {}", table, key, ph.next()), vec![key_value.clone()]),
            Statement::SelectByKey { table, key, key_value } => (format!("SELECT 1 FROM {} WHERE {} = {}", table, key, ph.next()), vec![key_value.clone()]),
            Statement::CreateView { view, query, params } => {
                if pg { (format!("CREATE VIEW {} AS {}", view, inline_params(query, params)), vec![]) }
                else { (format!("CREATE VIEW {} AS {}", view, query), params.clone()) }
            }
            Statement::DropView { view } => (format!("DROP VIEW {}", view), vec![]),
            Statement::FunctionExists { name } => {
                let (_, bare) = ident::split_relation(name);
                let sql = if pg { format!("SELECT 1 FROM pg_proc WHERE proname = {}", ph.next()) }
                    else { format!("SELECT 1 FROM sys.functions WHERE name = {}", ph.next()) };
                (sql, vec![Value::Text(bare.to_ascii_lowercase())])
            }
            Statement::DropFunction { name } => (format!("DROP FUNCTION {}", name), vec![]),
            Statement::CreateFunction { script, .. } => (script.clone(), vec![]),
        };
        Rendered { sql, params }
    }
}

/// One chunk of a bulk load: the column order, the explicit record count and the
/// pre-encoded `|`-delimited lines.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyCommand {
    pub table: String,
    pub columns: Vec<String>,
    pub count: usize,
    pub data: String,
}

impl CopyCommand {
    pub fn header(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::MonetDb => format!("COPY {} RECORDS INTO {} FROM STDIN NULL AS ''", self.count, self.table),
            Dialect::Postgres => format!("COPY {} ({}) FROM STDIN WITH (FORMAT text, DELIMITER '|', NULL '')", self.table, self.columns.join(", ")),
        }
    }

    /// Full command as sent over a MonetDB-style bulk-copy channel: header, then the lines.
    pub fn render(&self, dialect: Dialect) -> String {
        format!("{};\n{}\n", self.header(dialect), self.data)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.data.split('\n').filter(|l| !(self.count == 0 && l.is_empty()))
    }
}
