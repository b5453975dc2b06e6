use crate::handlers::common::{map_service_error, success_response};
use crate::{auth::AdminUser, errors::ApiError, AppState};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::info;

/// Operational endpoints, admin role only
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/checkouts/reconcile", post(reconcile_checkouts))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileQuery {
    pub limit: Option<u64>,
}

/// Retry order creation for checkouts that settled without an order
async fn reconcile_checkouts(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(query): Query<ReconcileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    info!(admin_id = %admin.buyer_id, "Reconciliation requested");
    let report = state
        .services
        .checkout
        .reconcile_unfulfilled(query.limit)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(report))
}
