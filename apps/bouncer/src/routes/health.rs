use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.sessions.len(),
        "upstreams": {
            "live": state.mux.live_upstreams(),
            "configured": state.mux.configured_upstreams(),
        },
    }))
}
