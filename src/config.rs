//! Service configuration: an optional JSON file named by `DATASTORE_CONFIG`, then
//! `DATASTORE_*` environment overrides on top.

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bulk::DEFAULT_CHUNK_SIZE;
use crate::partition::MatchPolicy;
use crate::service::DatastoreOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    /// Pool size: concurrent operations against the database.
    pub max_workers: usize,
    pub catalog_dir: PathBuf,
    pub http_bind: String,
    pub partition_match: MatchPolicy,
    pub bulk_chunk_size: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            db_host: "localhost".into(),
            db_port: 5432,
            db_user: "datastore".into(),
            db_password: String::new(),
            db_name: "datastore".into(),
            max_workers: 4,
            catalog_dir: PathBuf::from("catalog"),
            http_bind: "0.0.0.0:7878".into(),
            partition_match: MatchPolicy::AnyKey,
            bulk_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", key, raw, e))
}

impl DatastoreConfig {
    /// Defaults, then the JSON file from `DATASTORE_CONFIG`, then environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("DATASTORE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path))
    }

    /// Apply `DATASTORE_*` overrides read through `get`.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = get("DATASTORE_DB_HOST") { self.db_host = v; }
        if let Some(v) = get("DATASTORE_DB_PORT") { self.db_port = parse_env("DATASTORE_DB_PORT", &v)?; }
        if let Some(v) = get("DATASTORE_DB_USER") { self.db_user = v; }
        if let Some(v) = get("DATASTORE_DB_PASSWORD") { self.db_password = v; }
        if let Some(v) = get("DATASTORE_DATABASE") { self.db_name = v; }
        if let Some(v) = get("DATASTORE_MAX_WORKERS") { self.max_workers = parse_env("DATASTORE_MAX_WORKERS", &v)?; }
        if let Some(v) = get("DATASTORE_CATALOG_DIR") { self.catalog_dir = PathBuf::from(v); }
        if let Some(v) = get("DATASTORE_HTTP_BIND") { self.http_bind = v; }
        if let Some(v) = get("DATASTORE_PARTITION_MATCH") { self.partition_match = parse_env("DATASTORE_PARTITION_MATCH", &v)?; }
        if let Some(v) = get("DATASTORE_BULK_CHUNK_SIZE") { self.bulk_chunk_size = parse_env("DATASTORE_BULK_CHUNK_SIZE", &v)?; }
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.bulk_chunk_size == 0 {
            anyhow::bail!("bulk_chunk_size must be at least 1");
        }
        Ok(())
    }

    pub fn options(&self) -> DatastoreOptions {
        DatastoreOptions { partition_match: self.partition_match, bulk_chunk_size: self.bulk_chunk_size }
    }

    #[cfg(feature = "postgres")]
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.db_host).port(self.db_port).user(&self.db_user).dbname(&self.db_name);
        if !self.db_password.is_empty() {
            cfg.password(&self.db_password);
        }
        cfg
    }
}
