use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::history::{BriefingHistory, HistoryEntry};
use crate::pipeline::{BriefingGenerator, BriefingRequest};

/// Days of history consulted for style rotation and topic dedupe.
const RECENT_DAYS: usize = 7;
const DEFAULT_HISTORY_ROWS: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<BriefingGenerator>,
    pub history: Arc<BriefingHistory>,
}

impl AppState {
    pub fn new(generator: BriefingGenerator) -> Self {
        Self {
            generator: Arc::new(generator),
            history: Arc::new(BriefingHistory::with_capacity(2000)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/briefing", post(generate_briefing))
        .route("/history", get(history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// 200 with the briefing, or 204 when there is nothing to report for the date.
async fn generate_briefing(State(state): State<AppState>, Json(req): Json<BriefingRequest>) -> Response {
    let recent = state.history.recent_before(req.target_date, RECENT_DAYS);
    match state.generator.generate(&req, &recent).await {
        Some(doc) => {
            state.history.push(&doc, state.generator.now());
            (StatusCode::OK, Json(doc)).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn history(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<HistoryEntry>> {
    let n = q
        .get("n")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HISTORY_ROWS);
    Json(state.history.snapshot_last_n(n))
}
