//! HTTP binding of the RPC surface.
//!
//! - `GET /` liveness text
//! - `GET /rpc` list of methods
//! - `POST /rpc/{method}` JSON named arguments in, `{"status":"ok","result":...}` out;
//!   failures answer `{"status":"error","error":{type,code,message}}` with the error's
//!   HTTP status.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use tracing::{error, info};

use crate::catalog::CatalogStore;
use crate::error::DatastoreError;
use crate::pool::Connector;
use crate::rpc;
use crate::service::Datastore;

pub fn router<K: Connector, S: CatalogStore + 'static>(ds: Arc<Datastore<K, S>>) -> Router {
    Router::new()
        .route("/", get(|| async { "datastore ok" }))
        .route("/rpc", get(|| async { Json(json!({ "methods": rpc::METHODS })) }))
        .route("/rpc/{method}", post(rpc_handler::<K, S>))
        .with_state(ds)
}

fn error_response(e: &DatastoreError) -> (StatusCode, Json<JsonValue>) {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "status": "error", "error": e })))
}

async fn rpc_handler<K: Connector, S: CatalogStore + 'static>(
    State(ds): State<Arc<Datastore<K, S>>>,
    Path(method): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let args: JsonValue = if body.iter().all(|b| b.is_ascii_whitespace()) {
        JsonValue::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => return error_response(&DatastoreError::validation("invalid_json", e.to_string())),
        }
    };
    match rpc::dispatch(ds.as_ref(), &method, args).await {
        Ok(result) => (StatusCode::OK, Json(json!({ "status": "ok", "result": result }))),
        Err(e) => {
            if e.http_status() >= 500 {
                error!(target: "datastore::rpc", "{} failed: {}", method, e);
            } else {
                info!(target: "datastore::rpc", "{} rejected: {}", method, e);
            }
            error_response(&e)
        }
    }
}

/// Bind and serve until the listener fails.
pub async fn serve<K: Connector, S: CatalogStore + 'static>(ds: Arc<Datastore<K, S>>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address '{}'", bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    info!("Starting datastore RPC server on {}", addr);
    axum::serve(listener, router(ds)).await?;
    Ok(())
}
