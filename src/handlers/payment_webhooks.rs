use crate::{
    gateway::stripe::SIGNATURE_HEADER,
    services::commerce::NotificationOutcome,
    AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::error;

// POST /api/v1/payments/webhook
//
// The body is taken as raw bytes: the signature covers the exact payload.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state
        .services
        .checkout
        .handle_notification(&body, signature)
        .await
    {
        Ok(NotificationOutcome::Rejected) => (StatusCode::BAD_REQUEST, "invalid signature"),
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            // the gateway redelivers on non-2xx; reapplying is idempotent
            error!(error = %e, "Payment notification could not be processed");
            (StatusCode::SERVICE_UNAVAILABLE, "retry later")
        }
    }
}
