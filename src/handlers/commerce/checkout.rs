use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    auth::AuthUser,
    entities::commerce::{CheckoutLineItem, CheckoutModel, CheckoutStatus},
    errors::ApiError,
    services::commerce::{CreateCheckoutInput, CreatedCheckout},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkout))
        .route("/:session_id", get(get_checkout))
}

/// Start a hosted payment session for the buyer's cart
async fn create_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .services
        .checkout
        .create_checkout(user.buyer_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(CreateCheckoutResponse::from(created)))
}

/// Get one of the caller's checkouts by gateway session id
async fn get_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checkout = state
        .services
        .checkout
        .get_checkout(user.buyer_id, &session_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CheckoutView::from(checkout)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    pub checkout_id: Uuid,
    pub session_id: String,
    pub session_url: String,
}

impl From<CreatedCheckout> for CreateCheckoutResponse {
    fn from(created: CreatedCheckout) -> Self {
        Self {
            checkout_id: created.checkout_id,
            session_id: created.session_id,
            session_url: created.session_url,
        }
    }
}

/// Buyer-facing view of a checkout. Gateway payloads stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub id: Uuid,
    pub session_id: String,
    pub status: CheckoutStatus,
    pub total_minor_units: i64,
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CheckoutModel> for CheckoutView {
    fn from(model: CheckoutModel) -> Self {
        Self {
            id: model.id,
            session_id: model.session_id,
            status: model.status,
            total_minor_units: model.total_minor_units,
            currency: model.currency,
            line_items: model.line_items.0,
            order_id: model.order_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
