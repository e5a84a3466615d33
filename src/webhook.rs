//! HTTP intake for upstream chain-indexer webhooks, plus the liveness
//! endpoint. Built on `axum`, with small route groups over one shared
//! `Arc<AppState>`.

use crate::config::AppConfig;
use crate::event_consumer::EventConsumer;
use crate::event_queue::{EventMetadata, EventType, Priority, QueuedEvent};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::error;

const SECRET_HEADER: &str = "goldsky-webhook-secret";

pub struct AppState {
    pub consumer: Option<Arc<EventConsumer>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(consumer: Arc<EventConsumer>, config: Arc<AppConfig>) -> Self {
        Self {
            consumer: Some(consumer),
            config,
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook secret")]
    Unauthorized,
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("unknown webhook: {0}")]
    UnknownWebhook(String),
    #[error("handlers not initialized")]
    NotReady,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedBody(_) | WebhookError::UnknownWebhook(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    processed: bool,
    #[serde(rename = "webhookId")]
    webhook_id: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{webhook_name}", post(handle_webhook))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        mode: "invoice-handler",
    })
}

fn event_type_from_webhook_name(name: &str) -> Option<EventType> {
    match name {
        "invoice-enqueued" => Some(EventType::InvoiceEnqueued),
        "settlement-enqueued" => Some(EventType::SettlementEnqueued),
        _ => None,
    }
}

fn verify_secret(headers: &HeaderMap, configured: &str) -> Result<(), WebhookError> {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::Unauthorized)?;
    let matches: bool = provided.as_bytes().ct_eq(configured.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err(WebhookError::Unauthorized)
    }
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(webhook_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match process_webhook(&state, &webhook_name, &headers, &body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn process_webhook(
    state: &AppState,
    webhook_name: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookResponse, WebhookError> {
    verify_secret(headers, &state.config.webhook_shared_secret)?;

    let consumer = state.consumer.as_ref().ok_or(WebhookError::NotReady)?;

    let event_type = event_type_from_webhook_name(webhook_name)
        .ok_or_else(|| WebhookError::UnknownWebhook(webhook_name.to_string()))?;

    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedBody(e.to_string()))?;

    let webhook_id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WebhookError::MalformedBody("missing \"id\" field".to_string()))?
        .to_string();

    let block_number = payload
        .get("blockNumber")
        .and_then(block_number_from_value)
        .ok_or_else(|| WebhookError::MalformedBody("missing \"blockNumber\" field".to_string()))?;

    if block_number < state.config.webhook_min_block_number {
        return Ok(WebhookResponse {
            message: Some("ignored: historical replay".to_string()),
            processed: false,
            webhook_id,
        });
    }

    let now = chrono::Utc::now().timestamp_millis();
    let event = QueuedEvent {
        id: webhook_id.clone(),
        event_type,
        data: payload,
        priority: Priority::Normal,
        retry_count: 0,
        max_retries: state.config.event_max_retries,
        scheduled_at: now,
        metadata: EventMetadata {
            source: webhook_name.to_string(),
            original_webhook_id: Some(webhook_id.clone()),
            ..Default::default()
        },
    };

    let already_seen = consumer
        .add_event(event)
        .await
        .map_err(|e| WebhookError::Internal(e.to_string()))?;

    Ok(WebhookResponse {
        message: None,
        processed: !already_seen,
        webhook_id,
    })
}

fn block_number_from_value(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
