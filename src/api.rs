use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use alloy::primitives::Address;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::aggregator::{self, StreamState};
use crate::config::Config;
use crate::db::{self, RecordKind, SqliteStore, SyncStatus};
use crate::models::{EventId, FlowRecord};
use crate::portfolio::{flow_rate_from_monthly, per_second_amount};
use crate::subgraph::{Portfolio, SubgraphClient};

#[derive(Clone)]
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub subgraph: SubgraphClient,
}

#[derive(Deserialize)]
pub struct FlowQuery {
    pub sender: Option<Address>,
    pub limit: Option<u32>, // defaults to 10
}

#[derive(Deserialize)]
pub struct QuoteQuery {
    pub monthly: Decimal,
    pub decimals: Option<u8>, // defaults to 18
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub monthly: Decimal,
    pub per_second: Decimal,
    pub flow_rate: String,
}

/// Error response body `{ "error": ... }`.
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn internal(e: impl std::fmt::Display) -> Self {
        error!("API error: {}", e);
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Flowcentive indexer API running" }))
        .route("/status", get(get_status))
        .route("/flows/:kind", get(get_flows))
        .route("/records/:id", get(get_record))
        .route("/streams/:sender", get(get_stream))
        .route("/portfolio/:account", get(get_portfolio))
        .route("/quote", get(get_quote))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(cfg: Config, conn: Arc<Mutex<Connection>>) -> eyre::Result<()> {
    let state = AppState {
        conn,
        subgraph: SubgraphClient::new(cfg.subgraph_url.clone())?,
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service()).await?;

    Ok(())
}

// ---------- DB wrappers (spawn_blocking) ----------

async fn with_db<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
{
    task::spawn_blocking(move || {
        let db = conn.lock().map_err(|_| ApiError::internal("database mutex poisoned"))?;
        f(&db)
    })
    .await
    .map_err(ApiError::internal)?
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Vec<SyncStatus>> {
    with_db(state.conn, |db| db::sync_status(db).map_err(ApiError::internal))
        .await
        .map(Json)
}

async fn get_flows(
    State(state): State<AppState>,
    Path(kind): Path<RecordKind>,
    Query(q): Query<FlowQuery>,
) -> ApiResult<Vec<FlowRecord>> {
    let limit = q.limit.unwrap_or(10).min(1000);
    with_db(state.conn, move |db| {
        db::list_records(db, kind, q.sender, limit).map_err(ApiError::internal)
    })
    .await
    .map(Json)
}

async fn get_record(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<FlowRecord> {
    let id: EventId = id
        .parse()
        .map_err(|e: crate::models::InvalidEventId| ApiError(StatusCode::BAD_REQUEST, e.to_string()))?;

    with_db(state.conn, move |db| match db::get_record(db, id) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(ApiError(StatusCode::NOT_FOUND, format!("no record {}", id))),
        Err(e) => Err(ApiError::internal(e)),
    })
    .await
    .map(Json)
}

async fn get_stream(State(state): State<AppState>, Path(sender): Path<Address>) -> ApiResult<StreamState> {
    with_db(state.conn, move |db| {
        aggregator::stream_state(&SqliteStore::new(db), sender).map_err(ApiError::internal)
    })
    .await
    .map(Json)
}

async fn get_portfolio(State(state): State<AppState>, Path(account): Path<Address>) -> ApiResult<Portfolio> {
    state
        .subgraph
        .portfolio(account)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Portfolio query failed for {}: {}", account, e);
            ApiError(StatusCode::BAD_GATEWAY, e.to_string())
        })
}

async fn get_quote(Query(q): Query<QuoteQuery>) -> ApiResult<Quote> {
    let decimals = q.decimals.unwrap_or(18);
    let flow_rate = flow_rate_from_monthly(q.monthly, decimals)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(Quote {
        monthly: q.monthly,
        per_second: per_second_amount(q.monthly),
        flow_rate: flow_rate.to_string(),
    }))
}
