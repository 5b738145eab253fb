//! In-process columnar engine.
//!
//! `MemoryDatabase` holds the committed state shared by every connection. A
//! `MemoryConnection` remembers each mutating statement of its open transaction.
//! Every statement sees the latest committed state with those pending operations
//! replayed on top (read committed), and `commit` replays them once more against the
//! committed state under the lock, so concurrent transactions never overwrite each
//! other's rows. Error semantics follow PostgreSQL: any failed statement aborts the
//! transaction until `rollback`.
//!
//! Queries carried by views, `CREATE TABLE AS` and `INSERT ... SELECT` are limited to
//! `SELECT <cols|*> FROM <relation> [WHERE <col> = <param|literal>]`.

use std::collections::HashMap as StdHashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::{Connection, DbError};
use crate::model::ColumnDef;
use crate::pool::Connector;
use crate::sql::{CopyCommand, Dialect, Statement};
use crate::value::{Record, Value};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*SELECT\s+(?P<cols>\*|[A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s+FROM\s+(?P<src>[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)?)(?:\s+WHERE\s+(?P<wcol>[A-Za-z_]\w*)\s*=\s*(?P<wval>%s|\$1|-?\d+|'[^']*'))?\s*;?\s*$",
    )
    .expect("select regex")
});

const MAX_VIEW_DEPTH: u8 = 8;

#[derive(Debug, Clone, PartialEq)]
enum TableKind {
    Plain,
    Merge { children: Vec<String> },
}

#[derive(Debug, Clone)]
struct MemTable {
    name: String,
    columns: Vec<ColumnDef>,
    /// One vector per column.
    data: Vec<Vec<Value>>,
    len: usize,
    kind: TableKind,
    parent: Option<String>,
}

impl MemTable {
    fn new(name: &str, columns: Vec<ColumnDef>, kind: TableKind) -> Self {
        let data = columns.iter().map(|_| Vec::new()).collect();
        Self { name: name.to_string(), columns, data, len: 0, kind, parent: None }
    }

    fn column_index(&self, name: &str) -> Result<usize, DbError> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| DbError::Statement(format!("column '{}' not found in table '{}'", name, self.name)))
    }

    fn push_row(&mut self, row: Vec<Value>) {
        for (col, v) in self.data.iter_mut().zip(row) { col.push(v); }
        self.len += 1;
    }

    fn row(&self, i: usize) -> Vec<Value> {
        self.data.iter().map(|col| col[i].clone()).collect()
    }

    fn matching(&self, col: usize, key: &Value) -> Vec<usize> {
        (0..self.len).filter(|&i| values_equal(&self.data[col][i], key)).collect()
    }

    fn remove_rows(&mut self, rows: &[usize]) {
        let drop: HashSet<usize> = rows.iter().copied().collect();
        for col in self.data.iter_mut() {
            let mut i = 0;
            col.retain(|_| { let keep = !drop.contains(&i); i += 1; keep });
        }
        self.len -= drop.len();
    }
}

#[derive(Debug, Clone)]
struct StoredView {
    name: String,
    query: String,
    params: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
struct MemState {
    tables: StdHashMap<String, MemTable>,
    views: StdHashMap<String, StoredView>,
    functions: StdHashMap<String, String>,
}

struct QueryResult {
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
}

fn norm(name: &str) -> String { name.to_ascii_lowercase() }

fn function_key(name: &str) -> String {
    norm(name.rsplit('.').next().unwrap_or(name))
}

/// SQL-ish equality: numbers compare across int/float, everything else exactly; NULL never matches.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// Parse a bulk-copy field according to the declared column type.
fn coerce_field(field: &str, sql_type: &str) -> Result<Value, DbError> {
    if field.is_empty() { return Ok(Value::Null); }
    let ty = sql_type.trim().to_ascii_uppercase();
    let bad = |e: &dyn std::fmt::Display| DbError::Statement(format!("invalid value '{}' for type {}: {}", field, sql_type, e));
    if ty.contains("INT") {
        return field.parse::<i64>().map(Value::Int).map_err(|e| bad(&e));
    }
    if ["DOUBLE", "FLOAT", "REAL", "DECIMAL", "NUMERIC"].iter().any(|t| ty.starts_with(t)) {
        return field.parse::<f64>().map(Value::Float).map_err(|e| bad(&e));
    }
    if ty.starts_with("BOOL") {
        return match field.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad(&"not a boolean")),
        };
    }
    Ok(Value::Text(field.to_string()))
}

impl MemState {
    fn relation_exists(&self, name: &str) -> bool {
        let k = norm(name);
        self.tables.contains_key(&k) || self.views.contains_key(&k)
    }

    fn table(&self, name: &str) -> Result<&MemTable, DbError> {
        self.tables.get(&norm(name)).ok_or_else(|| DbError::RelationNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable, DbError> {
        self.tables.get_mut(&norm(name)).ok_or_else(|| DbError::RelationNotFound(name.to_string()))
    }

    /// Row-major rows of a table; a merge table reads through to its partitions.
    fn table_rows(&self, t: &MemTable) -> Vec<Vec<Value>> {
        match &t.kind {
            TableKind::Plain => (0..t.len).map(|i| t.row(i)).collect(),
            TableKind::Merge { children } => children
                .iter()
                .filter_map(|c| self.tables.get(c))
                .flat_map(|child| (0..child.len).map(move |i| child.row(i)))
                .collect(),
        }
    }

    fn eval_query(&self, query: &str, params: &[Value], depth: u8) -> Result<QueryResult, DbError> {
        if depth > MAX_VIEW_DEPTH {
            return Err(DbError::Statement("view nesting too deep".into()));
        }
        let caps = SELECT_RE
            .captures(query)
            .ok_or_else(|| DbError::Statement(format!("unsupported query: {}", query)))?;
        let src = &caps["src"];
        let source = if let Some(t) = self.tables.get(&norm(src)) {
            QueryResult { columns: t.columns.clone(), rows: self.table_rows(t) }
        } else if let Some(v) = self.views.get(&norm(src)) {
            self.eval_query(&v.query, &v.params, depth + 1)?
        } else {
            return Err(DbError::RelationNotFound(src.to_string()));
        };
        let find = |name: &str| {
            source
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| DbError::Statement(format!("column '{}' not found in '{}'", name, src)))
        };
        let projection: Vec<usize> = if caps["cols"].trim() == "*" {
            (0..source.columns.len()).collect()
        } else {
            caps["cols"].split(',').map(|c| find(c.trim())).collect::<Result<_, _>>()?
        };
        let filter = match (caps.name("wcol"), caps.name("wval")) {
            (Some(c), Some(v)) => {
                let raw = v.as_str();
                let value = if raw == "%s" || raw == "$1" {
                    params.first().cloned().ok_or_else(|| DbError::Statement("missing query parameter".into()))?
                } else if let Some(s) = raw.strip_prefix('\'') {
                    Value::Text(s.trim_end_matches('\'').to_string())
                } else {
                    Value::Int(raw.parse().map_err(|_| DbError::Statement(format!("bad literal {}", raw)))?)
                };
                Some((find(c.as_str())?, value))
            }
            _ => None,
        };
        let rows = source
            .rows
            .into_iter()
            .filter(|r| filter.as_ref().map_or(true, |(i, v)| values_equal(&r[*i], v)))
            .map(|r| projection.iter().map(|&i| r[i].clone()).collect())
            .collect();
        let columns = projection.iter().map(|&i| source.columns[i].clone()).collect();
        Ok(QueryResult { columns, rows })
    }

    fn create(&mut self, table: &str, columns: &[ColumnDef], kind: TableKind) -> Result<u64, DbError> {
        if self.relation_exists(table) {
            return Err(DbError::Statement(format!("name '{}' already in use", table)));
        }
        self.tables.insert(norm(table), MemTable::new(table, columns.to_vec(), kind));
        Ok(0)
    }

    /// Apply one statement. Validation happens before any mutation so a failed
    /// statement leaves the state untouched.
    fn apply(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        match stmt {
            Statement::Ping => Ok(1),
            Statement::Probe { table } => {
                let k = norm(table);
                if let Some(t) = self.tables.get(&k) {
                    Ok(self.table_rows(t).len().min(1) as u64)
                } else if let Some(v) = self.views.get(&k) {
                    Ok(self.eval_query(&v.query, &v.params, 0)?.rows.len().min(1) as u64)
                } else {
                    Err(DbError::RelationNotFound(table.clone()))
                }
            }
            Statement::CreateTable { table, columns } => self.create(table, columns, TableKind::Plain),
            Statement::CreateMergeTable { table, columns } => self.create(table, columns, TableKind::Merge { children: Vec::new() }),
            Statement::CreateTableAs { table, query, params } => {
                let shape = self.eval_query(query, params, 0)?;
                self.create(table, &shape.columns, TableKind::Plain)
            }
            Statement::DropTable { table } => {
                let t = self.table(table)?;
                if let Some(parent) = &t.parent {
                    return Err(DbError::Statement(format!("table '{}' is a partition of '{}'", table, parent)));
                }
                if let Some(t) = self.tables.remove(&norm(table)) {
                    if let TableKind::Merge { children } = t.kind {
                        for c in children {
                            if let Some(child) = self.tables.get_mut(&c) { child.parent = None; }
                        }
                    }
                }
                Ok(0)
            }
            Statement::AttachPartition { parent, partition } => {
                let (pk, ck) = (norm(parent), norm(partition));
                let p = self.table(parent)?;
                let c = self.table(partition)?;
                if !matches!(p.kind, TableKind::Merge { .. }) {
                    return Err(DbError::Statement(format!("'{}' is not a merge table", parent)));
                }
                if c.kind != TableKind::Plain || c.parent.is_some() {
                    return Err(DbError::Statement(format!("'{}' cannot be attached", partition)));
                }
                if p.columns.len() != c.columns.len() {
                    return Err(DbError::Statement(format!("column mismatch attaching '{}' to '{}'", partition, parent)));
                }
                if let Some(MemTable { kind: TableKind::Merge { children }, .. }) = self.tables.get_mut(&pk) {
                    children.push(ck.clone());
                }
                self.table_mut(partition)?.parent = Some(pk);
                Ok(0)
            }
            Statement::DetachPartition { parent, partition } => {
                let (pk, ck) = (norm(parent), norm(partition));
                let attached = matches!(self.table(parent)?.kind, TableKind::Merge { ref children } if children.contains(&ck));
                if !attached {
                    return Err(DbError::Statement(format!("'{}' is not a partition of '{}'", partition, parent)));
                }
                if let Some(MemTable { kind: TableKind::Merge { children }, .. }) = self.tables.get_mut(&pk) {
                    children.retain(|c| c != &ck);
                }
                self.table_mut(partition)?.parent = None;
                Ok(0)
            }
            Statement::Insert { table, columns, values } => {
                let t = self.table(table)?;
                if t.kind != TableKind::Plain {
                    return Err(DbError::Statement(format!("cannot insert into merge table '{}'", table)));
                }
                let mut row = vec![Value::Null; t.columns.len()];
                for (c, v) in columns.iter().zip(values) {
                    row[t.column_index(c)?] = v.clone();
                }
                self.table_mut(table)?.push_row(row);
                Ok(1)
            }
            Statement::InsertSelect { table, query, params } => {
                let result = self.eval_query(query, params, 0)?;
                let t = self.table(table)?;
                if t.kind != TableKind::Plain {
                    return Err(DbError::Statement(format!("cannot insert into merge table '{}'", table)));
                }
                if result.columns.len() != t.columns.len() {
                    return Err(DbError::Statement(format!("query returns {} columns, '{}' has {}", result.columns.len(), table, t.columns.len())));
                }
                let n = result.rows.len() as u64;
                let t = self.table_mut(table)?;
                for row in result.rows { t.push_row(row); }
                Ok(n)
            }
            Statement::Update { table, assignments, key, key_value } => {
                let t = self.table(table)?;
                if t.kind != TableKind::Plain {
                    return Err(DbError::Statement(format!("cannot update merge table '{}'", table)));
                }
                let targets = assignments
                    .iter()
                    .map(|(c, v)| Ok((t.column_index(c)?, v.clone())))
                    .collect::<Result<Vec<_>, DbError>>()?;
                let rows = t.matching(t.column_index(key)?, key_value);
                let t = self.table_mut(table)?;
                for &i in &rows {
                    for (col, v) in &targets { t.data[*col][i] = v.clone(); }
                }
                Ok(rows.len() as u64)
            }
            Statement::Delete { table, key, key_value } => {
                let t = self.table(table)?;
                if t.kind != TableKind::Plain {
                    return Err(DbError::Statement(format!("cannot delete from merge table '{}'", table)));
                }
                let rows = t.matching(t.column_index(key)?, key_value);
                self.table_mut(table)?.remove_rows(&rows);
                Ok(rows.len() as u64)
            }
            Statement::SelectByKey { table, key, key_value } => {
                let t = self.table(table)?;
                let col = t.column_index(key)?;
                Ok(self.table_rows(t).iter().filter(|r| values_equal(&r[col], key_value)).count() as u64)
            }
            Statement::CreateView { view, query, params } => {
                if self.relation_exists(view) {
                    return Err(DbError::Statement(format!("name '{}' already in use", view)));
                }
                self.eval_query(query, params, 0)?;
                self.views.insert(norm(view), StoredView { name: view.clone(), query: query.clone(), params: params.clone() });
                Ok(0)
            }
            Statement::DropView { view } => {
                self.views.remove(&norm(view)).map(|_| 0).ok_or_else(|| DbError::RelationNotFound(view.clone()))
            }
            Statement::FunctionExists { name } => Ok(self.functions.contains_key(&function_key(name)) as u64),
            Statement::DropFunction { name } => self
                .functions
                .remove(&function_key(name))
                .map(|_| 0)
                .ok_or_else(|| DbError::Statement(format!("no such function '{}'", name))),
            Statement::CreateFunction { name, script } => {
                let k = function_key(name);
                if self.functions.contains_key(&k) {
                    return Err(DbError::Statement(format!("function '{}' already exists", name)));
                }
                self.functions.insert(k, script.clone());
                Ok(0)
            }
        }
    }

    fn copy(&mut self, cmd: &CopyCommand) -> Result<u64, DbError> {
        let t = self.table(&cmd.table)?;
        if t.kind != TableKind::Plain {
            return Err(DbError::Statement(format!("cannot copy into merge table '{}'", cmd.table)));
        }
        let order = cmd.columns.iter().map(|c| t.column_index(c)).collect::<Result<Vec<_>, _>>()?;
        let lines: Vec<&str> = cmd.lines().collect();
        if lines.len() != cmd.count {
            return Err(DbError::Statement(format!("expected {} records, got {}", cmd.count, lines.len())));
        }
        let mut rows = Vec::with_capacity(lines.len());
        for line in lines {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != order.len() {
                return Err(DbError::Statement(format!("expected {} fields, got {} in '{}'", order.len(), fields.len(), line)));
            }
            let mut row = vec![Value::Null; t.columns.len()];
            for (field, &i) in fields.iter().zip(&order) {
                row[i] = coerce_field(field, &t.columns[i].sql_type)?;
            }
            rows.push(row);
        }
        let n = rows.len() as u64;
        let t = self.table_mut(&cmd.table)?;
        for row in rows { t.push_row(row); }
        Ok(n)
    }
}

#[derive(Debug, Clone)]
enum PendingOp {
    Statement(Statement),
    Copy(CopyCommand),
}

#[derive(Default)]
struct Shared {
    committed: parking_lot::Mutex<MemState>,
    log: parking_lot::Mutex<Vec<String>>,
    failing: parking_lot::RwLock<HashSet<String>>,
    connects: AtomicUsize,
}

/// Handle to one in-process database; clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self { Self::default() }

    pub fn connect(&self) -> MemoryConnection {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        MemoryConnection { db: self.clone(), pending: Vec::new(), in_transaction: false, aborted: false, closed: false }
    }

    pub fn connector(&self) -> MemoryConnector { MemoryConnector { db: self.clone() } }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> usize { self.inner.connects.load(Ordering::SeqCst) }

    /// Every statement issued (MonetDB rendering), plus `COMMIT` / `ROLLBACK` markers.
    /// Pool liveness pings are not recorded.
    pub fn statement_log(&self) -> Vec<String> { self.inner.log.lock().clone() }

    pub fn clear_log(&self) { self.inner.log.lock().clear(); }

    /// Make every mutating statement (and bulk copy) that targets `relation` fail.
    pub fn fail_statements_on(&self, relation: &str) { self.inner.failing.write().insert(norm(relation)); }

    pub fn clear_failures(&self) { self.inner.failing.write().clear(); }

    pub fn has_table(&self, name: &str) -> bool { self.inner.committed.lock().tables.contains_key(&norm(name)) }

    pub fn has_view(&self, name: &str) -> bool { self.inner.committed.lock().views.contains_key(&norm(name)) }

    pub fn has_function(&self, name: &str) -> bool { self.inner.committed.lock().functions.contains_key(&function_key(name)) }

    pub fn function_script(&self, name: &str) -> Option<String> {
        self.inner.committed.lock().functions.get(&function_key(name)).cloned()
    }

    /// Sorted display names of all committed tables.
    pub fn table_names(&self) -> Vec<String> {
        let st = self.inner.committed.lock();
        let mut names: Vec<String> = st.tables.values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    /// Display names of the partitions attached to a merge table.
    pub fn partitions_of(&self, parent: &str) -> Vec<String> {
        let st = self.inner.committed.lock();
        match st.tables.get(&norm(parent)).map(|t| &t.kind) {
            Some(TableKind::Merge { children }) => children.iter().filter_map(|c| st.tables.get(c)).map(|t| t.name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Committed rows of a table (merge tables read through their partitions).
    pub fn rows(&self, table: &str) -> Option<Vec<Record>> {
        let st = self.inner.committed.lock();
        let t = st.tables.get(&norm(table))?;
        let names = t.column_names_owned();
        Some(st.table_rows(t).into_iter().map(|r| names.iter().cloned().zip(r).collect()).collect())
    }

    pub fn count(&self, table: &str) -> Option<usize> {
        let st = self.inner.committed.lock();
        let t = st.tables.get(&norm(table))?;
        Some(st.table_rows(t).len())
    }

    /// Evaluate a committed view.
    pub fn view_rows(&self, view: &str) -> Option<Vec<Record>> {
        let st = self.inner.committed.lock();
        let v = st.views.get(&norm(view))?;
        let res = st.eval_query(&v.query, &v.params, 0).ok()?;
        Some(res.rows.into_iter().map(|r| res.columns.iter().map(|c| c.name.clone()).zip(r).collect()).collect())
    }

    pub fn view_names(&self) -> Vec<String> {
        let st = self.inner.committed.lock();
        let mut names: Vec<String> = st.views.values().map(|v| v.name.clone()).collect();
        names.sort();
        names
    }

    fn record(&self, line: String) { self.inner.log.lock().push(line); }

    fn check_injected(&self, target: Option<&str>) -> Result<(), DbError> {
        match target {
            Some(t) if self.inner.failing.read().contains(&norm(t)) => Err(DbError::Statement(format!("injected failure on '{}'", t))),
            _ => Ok(()),
        }
    }
}

impl MemTable {
    fn column_names_owned(&self) -> Vec<String> { self.columns.iter().map(|c| c.name.clone()).collect() }
}

pub struct MemoryConnection {
    db: MemoryDatabase,
    pending: Vec<PendingOp>,
    in_transaction: bool,
    aborted: bool,
    closed: bool,
}

impl MemoryConnection {
    /// Simulate a dropped server connection: every later call fails.
    pub fn disconnect(&mut self) { self.closed = true; }

    fn check_open(&self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::Connection("connection closed".into()));
        }
        if self.aborted {
            return Err(DbError::Statement("current transaction is aborted, commands ignored until end of transaction block".into()));
        }
        Ok(())
    }

    /// Latest committed state with this transaction's pending work on top.
    fn snapshot(&self) -> Result<MemState, DbError> {
        let mut state = self.db.inner.committed.lock().clone();
        for op in &self.pending {
            op.replay(&mut state).map_err(|e| DbError::Statement(format!("could not serialize access: {}", e)))?;
        }
        Ok(state)
    }

    fn finish<F>(&mut self, op: PendingOp, injected: Result<(), DbError>, run: F) -> Result<u64, DbError>
    where
        F: FnOnce(&mut MemState) -> Result<u64, DbError>,
    {
        self.check_open()?;
        self.in_transaction = true;
        let res = injected.and_then(|_| self.snapshot()).and_then(|mut state| run(&mut state));
        match res {
            Ok(n) => {
                if op.is_mutation() { self.pending.push(op); }
                Ok(n)
            }
            Err(e) => {
                self.aborted = true;
                Err(e)
            }
        }
    }

    fn run(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        if let Statement::Ping = stmt {
            // a liveness check never opens a transaction
            self.check_open()?;
            return Ok(1);
        }
        self.db.record(stmt.render(Dialect::MonetDb).sql);
        let injected = if is_mutation(stmt) { self.db.check_injected(stmt.target()) } else { Ok(()) };
        self.finish(PendingOp::Statement(stmt.clone()), injected, |state| state.apply(stmt))
    }

    fn end(&mut self) {
        self.pending.clear();
        self.in_transaction = false;
        self.aborted = false;
    }
}

impl PendingOp {
    fn is_mutation(&self) -> bool {
        match self {
            PendingOp::Statement(s) => is_mutation(s),
            PendingOp::Copy(_) => true,
        }
    }

    fn replay(&self, state: &mut MemState) -> Result<(), DbError> {
        match self {
            PendingOp::Statement(s) => state.apply(s).map(|_| ()),
            PendingOp::Copy(c) => state.copy(c).map(|_| ()),
        }
    }
}

fn is_mutation(stmt: &Statement) -> bool {
    !matches!(stmt, Statement::Ping | Statement::Probe { .. } | Statement::SelectByKey { .. } | Statement::FunctionExists { .. })
}

impl Connection for MemoryConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> { self.run(stmt) }

    async fn select(&mut self, stmt: &Statement) -> Result<u64, DbError> { self.run(stmt) }

    async fn copy_in(&mut self, cmd: &CopyCommand) -> Result<u64, DbError> {
        self.db.record(cmd.header(Dialect::MonetDb));
        let injected = self.db.check_injected(Some(&cmd.table));
        self.finish(PendingOp::Copy(cmd.clone()), injected, |state| state.copy(cmd))
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::Connection("connection closed".into()));
        }
        self.db.record("COMMIT".into());
        if self.aborted {
            self.end();
            return Err(DbError::Statement("transaction aborted, rolled back".into()));
        }
        let ops = std::mem::take(&mut self.pending);
        let res = {
            let mut committed = self.db.inner.committed.lock();
            let mut next = committed.clone();
            let replayed = ops.iter().try_for_each(|op| op.replay(&mut next));
            if replayed.is_ok() { *committed = next; }
            replayed
        };
        self.end();
        res.map_err(|e| DbError::Statement(format!("commit conflict: {}", e)))
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::Connection("connection closed".into()));
        }
        if !self.in_transaction {
            return Ok(());
        }
        self.db.record("ROLLBACK".into());
        self.end();
        Ok(())
    }
}

/// Opens connections to a shared `MemoryDatabase`.
#[derive(Clone)]
pub struct MemoryConnector {
    db: MemoryDatabase,
}

impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, DbError> { Ok(self.db.connect()) }
}
