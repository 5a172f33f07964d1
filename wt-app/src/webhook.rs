//! WhatsApp Cloud API webhook: verification handshake and event ingestion.

use crate::gateway::Gateway;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use wt_channels::InboundMessage;

pub const WEBHOOK_PATH: &str = "/webhook/whatsapp";
const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

struct WebhookState {
    gateway: Arc<Gateway>,
    verify_token: String,
    app_secret: Option<String>,
}

pub fn router(gateway: Arc<Gateway>, verify_token: String, app_secret: Option<String>) -> Router {
    let state = Arc::new(WebhookState {
        gateway,
        verify_token,
        app_secret: app_secret
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
    });
    Router::new()
        .route(WEBHOOK_PATH, get(verify).post(ingest))
        .with_state(state)
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

#[tracing::instrument(level = "info", skip_all)]
async fn verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    let mode = query.mode.as_deref().map(str::trim).unwrap_or_default();
    let token = query
        .verify_token
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if mode == "subscribe" && !token.is_empty() && constant_time_eq(token, &state.verify_token) {
        tracing::info!("webhook verified");
        return (StatusCode::OK, query.challenge.unwrap_or_default()).into_response();
    }
    tracing::warn!(mode = %mode, "webhook verification failed");
    (StatusCode::FORBIDDEN, "verification failed".to_string()).into_response()
}

#[tracing::instrument(level = "info", skip_all, fields(bytes = body.len()))]
async fn ingest(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.app_secret.as_deref() {
        if !verify_signature(&headers, &body, secret) {
            tracing::warn!("rejected webhook with invalid signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "invalid x-hub-signature-256",
                })),
            )
                .into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(error = %error, "invalid webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "status": "error",
                    "error": format!("invalid whatsapp webhook payload: {error}"),
                })),
            )
                .into_response();
        }
    };

    let messages = parse_payload(payload);
    let accepted = messages.len();
    for inbound in messages {
        state.gateway.submit(inbound);
    }
    tracing::info!(accepted, "webhook processed");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "accepted": accepted,
        })),
    )
        .into_response()
}

/// Extracts actionable text messages. Status callbacks and non-text messages are ignored.
fn parse_payload(payload: WebhookPayload) -> Vec<InboundMessage> {
    if payload.object != BUSINESS_ACCOUNT_OBJECT {
        tracing::debug!(object = %payload.object, "ignoring non business-account webhook");
        return Vec::new();
    }
    let mut out = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            let contacts = change.value.contacts;
            for message in change.value.messages {
                if let Some(inbound) = convert_message(message, &contacts) {
                    out.push(inbound);
                }
            }
        }
    }
    out
}

fn convert_message(message: WebhookMessage, contacts: &[WebhookContact]) -> Option<InboundMessage> {
    let sender = message.from.trim();
    if sender.is_empty() || message.message_type != "text" {
        return None;
    }
    let content = message
        .text
        .as_ref()
        .map(|text| text.body.trim())
        .filter(|value| !value.is_empty())?
        .to_string();
    let contact = contacts
        .iter()
        .find(|c| c.wa_id == sender)
        .or_else(|| contacts.first())?;

    let message_id = match message.id.trim() {
        "" => ulid::Ulid::new().to_string(),
        id => id.to_string(),
    };
    let received_at = Utc::now();
    let sent_at = message
        .timestamp
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(received_at);

    Some(InboundMessage {
        message_id: message_id.into(),
        sender_id: sender.into(),
        sender_name: contact
            .profile
            .as_ref()
            .map(|p| p.name.trim().to_string())
            .filter(|name| !name.is_empty()),
        content,
        sent_at,
        received_at,
    })
}

fn verify_signature(headers: &HeaderMap, body: &[u8], app_secret: &str) -> bool {
    let Some(signature_header) = headers
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
    else {
        return false;
    };
    let expected = format!("sha256={}", hmac_sha256_hex(app_secret.as_bytes(), body));
    constant_time_eq(&expected, signature_header)
}

fn hmac_sha256_hex(key: &[u8], payload: &[u8]) -> String {
    const BLOCK: usize = 64;
    let mut key_block = [0_u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let inner_pad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    let outer_pad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();

    let inner = Sha256::new()
        .chain_update(&inner_pad)
        .chain_update(payload)
        .finalize();
    let digest = Sha256::new()
        .chain_update(&outer_pad)
        .chain_update(inner)
        .finalize();

    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let mut diff = left.len() ^ right.len();
    for index in 0..left.len().max(right.len()) {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    object: String,
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    #[serde(default)]
    value: WebhookValue,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    contacts: Vec<WebhookContact>,
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookContact {
    #[serde(default)]
    wa_id: String,
    #[serde(default)]
    profile: Option<WebhookProfile>,
}

#[derive(Debug, Deserialize)]
struct WebhookProfile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
struct WebhookText {
    #[serde(default)]
    body: String,
}
