//! Messaging-channel webhook
//!
//! `GET` answers the subscription handshake. `POST` carries inbound messages;
//! when an app secret is configured the body must be signed with it via
//! `X-Hub-Signature-256`.

use super::handlers::AppError;
use super::types::{VerifyQuery, WebhookAck};
use super::AppState;
use crate::channel::{parse_inbound, verify_signature, verify_subscription, WebhookPayload};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};

pub(super) async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, AppError> {
    match verify_subscription(
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
        state.whatsapp.verify_token.as_deref(),
    ) {
        Some(challenge) => {
            tracing::info!("Webhook subscription verified");
            Ok(challenge.to_string())
        }
        None => Err(AppError::Forbidden("Webhook verification failed".to_string())),
    }
}

pub(super) async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if let Some(secret) = state.whatsapp.app_secret.as_deref() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, signature, &body) {
            return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {e}")))?;
    if !payload.is_business_account() {
        return Err(AppError::NotFound(format!("Unsupported webhook object: {}", payload.object)));
    }

    if let Some(inbound) = parse_inbound(&payload) {
        tracing::info!(sender = %inbound.sender_address, "Inbound channel message");
        state
            .bridge
            .handle_inbound(&state.runtime, &inbound)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to process webhook: {e}")))?;
    }

    Ok(Json(WebhookAck { status: "ok" }))
}
