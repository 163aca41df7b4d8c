use axum::extract::State;

use crate::AppState;

/// Prometheus text exposition of the recorder's current state.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
