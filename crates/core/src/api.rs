//! HTTP surface of the query service.
//!
//! `GET /search?q=<text>&k=<n>` and `GET /health`.

use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::models::{HealthStatus, SearchHit};
use crate::service::{QueryService, DEFAULT_TOP_K};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(value: SearchError) -> Self {
        let status = match &value {
            SearchError::InvalidQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SearchError::Embedding(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

pub fn router<E, V>(service: Arc<QueryService<E, V>>) -> Router
where
    E: Embedder + 'static,
    V: VectorIndex + Send + Sync + 'static,
{
    Router::new()
        .route("/search", get(search::<E, V>))
        .route("/health", get(health::<E, V>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn search<E, V>(
    State(service): State<Arc<QueryService<E, V>>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<SearchHit>>, ApiError>
where
    E: Embedder + 'static,
    V: VectorIndex + Send + Sync + 'static,
{
    let Query(params) =
        params.map_err(|rejection| ApiError::unprocessable(rejection.body_text()))?;

    let query = params
        .q
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::unprocessable("query parameter `q` is required"))?;
    let k = params.k.unwrap_or(DEFAULT_TOP_K);
    if k == 0 {
        return Err(ApiError::unprocessable("`k` must be at least 1"));
    }

    let hits = service.search(&query, k).await.map_err(|err| {
        error!(error = %err, "search failed");
        ApiError::from(err)
    })?;
    Ok(Json(hits))
}

async fn health<E, V>(State(service): State<Arc<QueryService<E, V>>>) -> Json<HealthStatus>
where
    E: Embedder + 'static,
    V: VectorIndex + Send + Sync + 'static,
{
    Json(service.health())
}

/// Serves the router until the process is stopped.
pub async fn serve<E, V>(
    addr: SocketAddr,
    service: Arc<QueryService<E, V>>,
) -> std::io::Result<()>
where
    E: Embedder + 'static,
    V: VectorIndex + Send + Sync + 'static,
{
    let app = router(service);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "search API listening");
    axum::serve(listener, app).await
}
