//! Coordinator HTTP surface

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use serde_json::json;

use crate::client::monitor::UtilityDropReport;
use crate::coordinator::analysis::analyze_report;
use crate::coordinator::CoordinatorState;

pub fn create_router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/report", axum::routing::post(handle_report))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Accept a utility-drop report. Reports inside the per-(client,
/// region) cooldown are answered 429 and otherwise ignored; accepted
/// reports are analyzed in the background.
async fn handle_report(
    State(state): State<Arc<CoordinatorState>>,
    Json(report): Json<UtilityDropReport>,
) -> StatusCode {
    if !state.admit_report(&report.client_id, &report.region) {
        tracing::debug!(
            client = %report.client_id,
            region = %report.region,
            "report dropped: cooldown"
        );
        return StatusCode::TOO_MANY_REQUESTS;
    }

    tracing::info!(
        client = %report.client_id,
        region = %report.region,
        utility = report.avg_utility,
        "utility drop reported"
    );

    let state = Arc::clone(&state);
    tokio::spawn(async move {
        analyze_report(state, report).await;
    });

    StatusCode::OK
}
