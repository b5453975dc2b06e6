//! Payment gateway contract.
//!
//! The gateway is the only source of truth for whether money moved. The checkout service talks to
//! it exclusively through [`PaymentGateway`]; the Stripe-compatible HTTP adapter lives in
//! [`stripe`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

pub mod stripe;

pub use self::stripe::{StripeConfig, StripeGateway};

/// Errors raised by a gateway adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure, timeout or a 5xx from the provider
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request (4xx other than 404)
    #[error("payment gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("payment gateway has no record of {0}")]
    NotFound(String),

    #[error("invalid payment gateway response: {0}")]
    InvalidResponse(String),
}

/// One priced line handed to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    /// Gateway-side product reference
    pub product_reference: String,
    pub quantity: u32,
    pub unit_amount_minor: i64,
}

/// Everything needed to open a hosted payment session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Local checkout id, echoed back by the gateway as the client reference
    pub checkout_id: Uuid,
    pub buyer_id: Uuid,
    pub currency: String,
    pub customer_email: Option<String>,
    pub line_items: Vec<GatewayLineItem>,
}

/// Gateway response to session creation
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
    pub amount_total_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    /// Full provider payload, kept for audit
    pub raw: Value,
}

/// Finalized payment detail for a completed session
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Payment method and billing metadata
    pub billing_detail: Value,
    pub payment_intent_id: Option<String>,
    pub raw: Value,
}

/// Notification kinds the checkout state machine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum NotificationKind {
    #[strum(serialize = "checkout.session.completed")]
    SessionCompleted,
    #[strum(serialize = "checkout.session.async_payment_succeeded")]
    AsyncPaymentSucceeded,
    #[strum(serialize = "checkout.session.async_payment_failed")]
    AsyncPaymentFailed,
    #[strum(serialize = "checkout.session.expired")]
    SessionExpired,
    #[strum(serialize = "charge.refunded")]
    ChargeRefunded,
}

/// A notification whose signature has already been verified
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: Option<String>,
    /// Event type exactly as the gateway sent it
    pub event_type: String,
    /// `data.object` of the notification
    pub object: Value,
}

#[derive(Deserialize)]
struct EventEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: Value,
}

impl GatewayEvent {
    /// Parses a notification body. Only call this on a payload whose signature checked out.
    pub fn from_payload(payload: &[u8]) -> Result<Self, GatewayError> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidResponse(format!("malformed notification: {e}")))?;
        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            object: envelope.data.object,
        })
    }

    /// `None` for event types the state machine does not handle.
    pub fn kind(&self) -> Option<NotificationKind> {
        self.event_type.parse().ok()
    }

    /// Session id for `checkout.session.*` events
    pub fn session_id(&self) -> Option<&str> {
        match self.kind() {
            Some(NotificationKind::ChargeRefunded) | None => None,
            Some(_) => self.object.get("id").and_then(Value::as_str),
        }
    }

    /// Payment intent the event refers to, when present
    pub fn payment_intent_id(&self) -> Option<&str> {
        self.object.get("payment_intent").and_then(Value::as_str)
    }
}

/// Port to the external payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a hosted payment session for the priced line items. Never retried here.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, GatewayError>;

    /// Verifies a notification against the exact raw request bytes.
    ///
    /// Returns `None` on any signature problem so callers degrade to ignoring the payload.
    async fn verify_notification(&self, payload: &[u8], signature: &str) -> Option<GatewayEvent>;

    /// Retrieves the final settlement detail for a session.
    async fn fetch_settlement(&self, session_id: &str) -> Result<Settlement, GatewayError>;

    /// Expires an open session so it can no longer be paid.
    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_completed_session_event() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "sess_1", "payment_intent": "pi_1" } }
        });
        let event = GatewayEvent::from_payload(payload.to_string().as_bytes()).unwrap();

        assert_eq!(event.kind(), Some(NotificationKind::SessionCompleted));
        assert_eq!(event.session_id(), Some("sess_1"));
        assert_eq!(event.payment_intent_id(), Some("pi_1"));
    }

    #[test]
    fn refund_events_do_not_expose_a_session_id() {
        let payload = json!({
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "payment_intent": "pi_9" } }
        });
        let event = GatewayEvent::from_payload(payload.to_string().as_bytes()).unwrap();

        assert_eq!(event.kind(), Some(NotificationKind::ChargeRefunded));
        assert_eq!(event.session_id(), None);
        assert_eq!(event.payment_intent_id(), Some("pi_9"));
    }

    #[test]
    fn unknown_event_types_have_no_kind() {
        let payload = json!({ "type": "customer.created", "data": { "object": {} } });
        let event = GatewayEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind(), None);
        assert_eq!(
            NotificationKind::AsyncPaymentFailed.to_string(),
            "checkout.session.async_payment_failed"
        );
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(matches!(
            GatewayEvent::from_payload(b"not json"),
            Err(GatewayError::InvalidResponse(_))
        ));
    }
}
