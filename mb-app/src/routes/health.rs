use crate::server::BridgeState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<BridgeState>>) -> Json<serde_json::Value> {
    let page_mode = if state.adapter.is_multi_page() {
        "multi"
    } else {
        "single"
    };
    Json(serde_json::json!({
        "status": "ok",
        "bot_id": state.adapter.bot_id(),
        "page_mode": page_mode,
        "dispatched": state.gateway.dispatched(),
        "checked_at": Utc::now(),
    }))
}
