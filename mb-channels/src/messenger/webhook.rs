use super::signature::{SIGNATURE_HEADER, verify_signature};
use super::update::{NormalizedUpdate, WebhookPayload, normalize_entry};
use super::MessengerAdapter;
use crate::error::WebhookError;
use crate::traits::UpdateSink;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
struct WebhookState {
    adapter: Arc<MessengerAdapter>,
    sink: Arc<dyn UpdateSink>,
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Routes for the subscription handshake (GET) and event delivery (POST) at
/// the adapter's webhook path.
pub fn webhook_router(adapter: Arc<MessengerAdapter>, sink: Arc<dyn UpdateSink>) -> Router {
    let path = adapter.webhook_path().to_string();
    Router::new()
        .route(&path, get(verify_subscription).post(receive_updates))
        .with_state(WebhookState { adapter, sink })
}

impl MessengerAdapter {
    pub fn router(self: Arc<Self>, sink: Arc<dyn UpdateSink>) -> Router {
        webhook_router(self, sink)
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn verify_subscription(
    State(state): State<WebhookState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, WebhookError> {
    let token_matches = query
        .verify_token
        .as_deref()
        .is_some_and(|token| state.adapter.verify_token_matches(token));
    if !token_matches {
        tracing::warn!(mode = ?query.mode, "messenger webhook verify token mismatch");
        return Err(WebhookError::VerifyToken);
    }
    let Some(challenge) = query.challenge.filter(|c| !c.is_empty()) else {
        tracing::warn!(mode = ?query.mode, "messenger webhook handshake without challenge");
        return Err(WebhookError::Handshake("hub.challenge is required"));
    };
    tracing::info!(mode = ?query.mode, "messenger webhook subscription verified");
    Ok(challenge)
}

#[tracing::instrument(level = "info", skip_all, fields(body_len = body.len()))]
async fn receive_updates(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(error) = verify_signature(signature, &body, state.adapter.app_secret()) {
        tracing::warn!(%error, "rejected messenger webhook");
        return Err(error);
    }

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| WebhookError::Payload(e.to_string()))?;
    if payload.object != "page" {
        tracing::debug!(object = %payload.object, "messenger webhook for non-page object");
    }

    let received_at = Utc::now();
    let updates: Vec<NormalizedUpdate> = payload
        .entry
        .into_iter()
        .flat_map(|entry| normalize_entry(entry, received_at))
        .collect();
    for update in &updates {
        state.adapter.observe_identity(update);
    }
    let accepted = updates.len();
    spawn_dispatch(Arc::clone(&state.sink), updates);
    tracing::debug!(accepted, "messenger webhook batch handed off");

    Ok(Json(serde_json::json!({
        "status": "ok",
        "accepted": accepted,
    })))
}

/// Hand a batch to the sink on one background task, in array order. A
/// failed dispatch is logged and the walk continues with the next update.
fn spawn_dispatch(sink: Arc<dyn UpdateSink>, updates: Vec<NormalizedUpdate>) {
    if updates.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for update in updates {
            let page_id = update.page_id.clone();
            let kind = update.kind_label();
            if let Err(error) = sink.dispatch(update).await {
                tracing::warn!(%page_id, kind, error = %error, "messenger update dispatch failed");
            }
        }
    });
}
