//! Identifier and type allow-listing
//! ---------------------------------
//! Single source of truth for which table, column, view and function names, and which
//! SQL type spellings, may be spliced into statement text. Values never go through here;
//! they always travel as statement parameters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DatastoreError, DatastoreResult};

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));
static SQL_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*( [A-Za-z][A-Za-z0-9_]*)*(\(\s*\d+\s*(,\s*\d+\s*)?\))?$").expect("sql type regex")
});

/// Longest identifier segment accepted (PostgreSQL's NAMEDATALEN - 1).
pub const MAX_IDENT_LEN: usize = 63;

/// True if `s` is a single bare identifier segment.
pub fn is_identifier(s: &str) -> bool {
    s.len() <= MAX_IDENT_LEN && IDENT_RE.is_match(s)
}

/// Validate a relation name: a bare identifier, optionally qualified with one schema
/// segment (`schema.table`).
pub fn validate_relation(kind: &str, name: &str) -> DatastoreResult<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
        return Err(DatastoreError::validation("invalid_identifier", format!("invalid {} name: '{}'", kind, name)));
    }
    Ok(())
}

/// Validate a column name (never schema-qualified).
pub fn validate_column(name: &str) -> DatastoreResult<()> {
    if !is_identifier(name) {
        return Err(DatastoreError::validation("invalid_identifier", format!("invalid column name: '{}'", name)));
    }
    Ok(())
}

/// Validate a column type spelling such as `INTEGER`, `VARCHAR(5)`, `DECIMAL(10, 2)`
/// or `DOUBLE PRECISION`.
pub fn validate_sql_type(ty: &str) -> DatastoreResult<()> {
    if !SQL_TYPE_RE.is_match(ty.trim()) {
        return Err(DatastoreError::validation("invalid_type", format!("invalid column type: '{}'", ty)));
    }
    Ok(())
}

/// Split `schema.table` into its optional schema and table segments.
pub fn split_relation(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}
