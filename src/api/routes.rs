//! Ops surface: health, ingest counters, recent summaries, and the session
//! submission endpoint the external cookie-refresh collaborator posts to.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::SummaryRow;
use crate::error::AppError;
use crate::session;
use crate::stats::{ClassStatsView, IngestStats};
use crate::types::MarketClass;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub stats: Arc<IngestStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/ingest", get(get_ingest_stats))
        .route("/summary/recent", get(get_recent_summaries))
        .route("/session", post(post_session))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response / request types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub db_ok: bool,
    pub session_updated_at: Option<String>,
}

#[derive(Deserialize)]
pub struct RecentSummariesQuery {
    /// "nifty" or "banknifty" (defaults to nifty).
    pub class: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SessionSubmit {
    pub cookie: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let session_updated_at: Option<(String,)> =
        sqlx::query_as("SELECT updated_at FROM sessions ORDER BY id LIMIT 1")
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(HealthResponse {
        db_ok,
        session_updated_at: session_updated_at.map(|r| r.0),
    }))
}

async fn get_ingest_stats(State(state): State<ApiState>) -> Json<Vec<ClassStatsView>> {
    Json(state.stats.snapshot())
}

async fn get_recent_summaries(
    State(state): State<ApiState>,
    Query(params): Query<RecentSummariesQuery>,
) -> Result<Json<Vec<SummaryRow>>, AppError> {
    let tables = match params.class.as_deref().unwrap_or("nifty") {
        "nifty" => MarketClass::Nifty.option_tables(),
        "banknifty" => MarketClass::BankNifty.option_tables(),
        other => {
            return Err(AppError::Validation(format!(
                "unknown summary class '{other}'"
            )))
        }
    };
    let Some(tables) = tables else {
        return Err(AppError::Validation("class has no summary series".to_string()));
    };
    let limit = params.limit.unwrap_or(20).clamp(1, 500);

    let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
        "SELECT * FROM {} ORDER BY id DESC LIMIT ?",
        tables.summary
    ))
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

/// The session-refresh collaborator submits the freshly harvested cookie
/// string here; it lands in the single-row session store.
async fn post_session(
    State(state): State<ApiState>,
    Json(body): Json<SessionSubmit>,
) -> Result<StatusCode, AppError> {
    session::store_token(&state.pool, &body.cookie).await?;
    Ok(StatusCode::NO_CONTENT)
}
