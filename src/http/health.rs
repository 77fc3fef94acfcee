use axum::extract::State;
use axum::Json;

use crate::metrics::{self, MetricsSnapshot};
use crate::state::AppState;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(metrics::snapshot(&state.metrics, &state.registry))
}
