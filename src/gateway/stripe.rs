use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{
    CreateSessionRequest, GatewayError, GatewayEvent, GatewaySession, PaymentGateway, Settlement,
};
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the notification signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Allowed clock skew for timestamps that lie in the future
const FUTURE_SKEW_SECS: i64 = 60;

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub tolerance_secs: u64,
    pub timeout: Duration,
    pub success_url: String,
    pub cancel_url: String,
}

impl StripeConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            api_base: cfg.payment_gateway_api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.payment_gateway_secret_key.clone().unwrap_or_default(),
            webhook_secret: cfg.payment_webhook_secret.clone().unwrap_or_default(),
            tolerance_secs: cfg.payment_webhook_tolerance_secs,
            timeout: Duration::from_secs(cfg.payment_gateway_timeout_secs),
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        }
    }
}

/// Stripe Checkout adapter speaking the REST API over `reqwest`
#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.config.api_base)
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Value, GatewayError> {
        let response = request
            .basic_auth(&self.config.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Stripe API error: {e}")))?;

        read_json(response, subject).await
    }

    /// Verifies `header` for `payload` as of `now` (unix seconds).
    pub fn verify_signature_at(&self, payload: &[u8], header: &str, now: i64) -> bool {
        if self.config.webhook_secret.is_empty() {
            warn!("notification rejected: no webhook secret configured");
            return false;
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        let Some(timestamp_str) = timestamp else {
            return false;
        };
        let Ok(timestamp) = timestamp_str.parse::<i64>() else {
            return false;
        };

        let Some(age) = now.checked_sub(timestamp) else {
            warn!(timestamp, "notification rejected: timestamp out of range");
            return false;
        };
        let tolerance = i64::try_from(self.config.tolerance_secs).unwrap_or(i64::MAX);
        if age > tolerance {
            warn!(age_secs = age, "notification rejected: timestamp too old");
            return false;
        }
        if age < -FUTURE_SKEW_SECS {
            warn!(age_secs = age, "notification rejected: timestamp in the future");
            return false;
        }

        let Some(mac) = signed_mac(&self.config.webhook_secret, timestamp_str, payload) else {
            return false;
        };

        signatures.iter().any(|candidate| match hex::decode(candidate) {
            // verify_slice compares in constant time
            Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
            Err(_) => false,
        })
    }
}

fn signed_mac(secret: &str, timestamp: &str, payload: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac)
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let signature = signed_mac(secret, &timestamp.to_string(), payload)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}

async fn read_json(response: Response, subject: &str) -> Result<Value, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse Stripe response: {e}")));
    }

    let error_text = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), subject, "Stripe API error: {}", error_text);

    Err(match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(subject.to_string()),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::Unavailable(format!("Stripe returned {s}"))
        }
        s => GatewayError::Rejected {
            status: s.as_u16(),
            message: stripe_error_message(&error_text),
        },
    })
}

fn stripe_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "request rejected".to_string())
}

fn session_form(config: &StripeConfig, request: &CreateSessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "success_url".to_string(),
            format!("{}?session_id={{CHECKOUT_SESSION_ID}}", config.success_url),
        ),
        ("cancel_url".to_string(), config.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.checkout_id.to_string(),
        ),
        (
            "metadata[checkout_id]".to_string(),
            request.checkout_id.to_string(),
        ),
        ("metadata[buyer_id]".to_string(), request.buyer_id.to_string()),
    ];

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        form.push((
            format!("line_items[{i}][quantity]"),
            item.quantity.to_string(),
        ));
        form.push((
            format!("line_items[{i}][price_data][currency]"),
            request.currency.clone(),
        ));
        form.push((
            format!("line_items[{i}][price_data][unit_amount]"),
            item.unit_amount_minor.to_string(),
        ));
        form.push((
            format!("line_items[{i}][price_data][product]"),
            item.product_reference.clone(),
        ));
    }

    form
}

fn parse_session(raw: Value) -> Result<GatewaySession, GatewayError> {
    let field = |name: &str| GatewayError::InvalidResponse(format!("session response missing `{name}`"));

    let id = raw["id"].as_str().ok_or_else(|| field("id"))?.to_string();
    let url = raw["url"].as_str().ok_or_else(|| field("url"))?.to_string();
    let amount_total_minor = raw["amount_total"]
        .as_i64()
        .ok_or_else(|| field("amount_total"))?;
    let currency = raw["currency"]
        .as_str()
        .ok_or_else(|| field("currency"))?
        .to_string();
    let created = raw["created"].as_i64().ok_or_else(|| field("created"))?;
    let created_at = Utc
        .timestamp_opt(created, 0)
        .single()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("invalid created timestamp {created}")))?;

    Ok(GatewaySession {
        id,
        url,
        amount_total_minor,
        currency,
        created_at,
        raw,
    })
}

fn parse_settlement(raw: Value) -> Settlement {
    let payment_intent = &raw["payment_intent"];
    let payment_intent_id = payment_intent
        .as_str()
        .or_else(|| payment_intent["id"].as_str())
        .map(str::to_string);

    let payment_method = match &payment_intent["payment_method"] {
        Value::Null => raw["payment_method_types"].clone(),
        method => method.clone(),
    };

    let billing_detail = json!({
        "customer_details": raw["customer_details"],
        "payment_status": raw["payment_status"],
        "payment_method": payment_method,
    });

    Settlement {
        billing_detail,
        payment_intent_id,
        raw,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        let form = session_form(&self.config, &request);
        let builder = self
            .client
            .post(self.sessions_url())
            // a retried create for the same checkout returns the original session
            .header("Idempotency-Key", request.checkout_id.to_string())
            .form(&form);

        let raw = self.send(builder, "checkout session").await?;
        let session = parse_session(raw)?;
        info!(session_id = %session.id, amount = session.amount_total_minor, "Stripe checkout session created");
        Ok(session)
    }

    async fn verify_notification(&self, payload: &[u8], signature: &str) -> Option<GatewayEvent> {
        if !self.verify_signature_at(payload, signature, Utc::now().timestamp()) {
            return None;
        }

        match GatewayEvent::from_payload(payload) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "signed notification could not be parsed");
                None
            }
        }
    }

    #[instrument(skip(self))]
    async fn fetch_settlement(&self, session_id: &str) -> Result<Settlement, GatewayError> {
        let builder = self
            .client
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .query(&[("expand[]", "payment_intent.payment_method")]);

        let raw = self.send(builder, session_id).await?;
        debug!(session_id, "settlement retrieved");
        Ok(parse_settlement(raw))
    }

    #[instrument(skip(self))]
    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError> {
        let builder = self
            .client
            .post(format!("{}/{}/expire", self.sessions_url(), session_id));
        self.send(builder, session_id).await?;
        info!(session_id, "Stripe checkout session expired");
        Ok(())
    }
}
