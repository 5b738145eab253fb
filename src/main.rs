use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use datastore::catalog::FileCatalog;
use datastore::config::DatastoreConfig;
use datastore::connection::PgConnector;
use datastore::pool::Pool;
use datastore::Datastore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = DatastoreConfig::load()?;
    info!(
        target: "datastore",
        "datastore starting: db={}@{}:{}/{}, workers={}, catalog='{}', bind={}, partition_match={:?}",
        cfg.db_user, cfg.db_host, cfg.db_port, cfg.db_name, cfg.max_workers, cfg.catalog_dir.display(), cfg.http_bind, cfg.partition_match
    );

    let catalog = FileCatalog::open(&cfg.catalog_dir).with_context(|| format!("opening catalog at {}", cfg.catalog_dir.display()))?;
    let pool = Pool::new(PgConnector::new(cfg.pg_config()), cfg.max_workers);
    // fail fast on bad credentials instead of at the first request
    drop(pool.get().await.context("connecting to the database")?);

    let ds = Arc::new(Datastore::new(pool, Arc::new(catalog), cfg.options()));
    datastore::server::serve(ds, &cfg.http_bind).await
}
