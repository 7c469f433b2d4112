//! HTTP read API
//!
//! - `GET /fsm?id=<identity>` (or `/fsm/`) - flat offset rows for one identity
//! - `GET /latest?n=<count>` - nested views of the `n` newest FSMs (default 10)
//!
//! Input errors map to 400, store errors to 500, unknown paths to 404.

use crate::ledger::db::OffsetStore;
use crate::ledger::types::{OffsetRow, RecentLimit};
use crate::ledger::view::{load_recent, FsmView};
use crate::{LedgerError, Result};
use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OffsetStore>,
}

#[derive(Debug, Deserialize)]
pub struct FsmQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub n: Option<String>,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            log::error!("❌ Request failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn fsm_handler(
    State(state): State<AppState>,
    Query(query): Query<FsmQuery>,
) -> Result<Json<Vec<OffsetRow>>> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| LedgerError::invalid("missing required query parameter: id"))?;

    let rows = state.store.query_by_identity(&id).await?;
    Ok(Json(rows))
}

async fn latest_handler(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<FsmView>>> {
    let limit = RecentLimit::parse(query.n.as_deref())?;
    let views = load_recent(state.store.as_ref(), limit).await?;
    Ok(Json(views))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    log::warn!("⚠️  No route for {}", uri);
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("not found: {}", uri.path()) })),
    )
}

/// Build the read API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/fsm", get(fsm_handler))
        .route("/fsm/", get(fsm_handler))
        .route("/latest", get(latest_handler))
        .fallback(not_found)
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("🌐 Read API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("✅ Read API stopped");
    Ok(())
}
