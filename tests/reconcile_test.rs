//! Integration tests for settled checkouts whose order could not be created.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::commerce::CheckoutStatus;

async fn settled_without_order(app: &TestApp, session_id: &str) -> String {
    let product = app.seed_product("toaster", dec!(12.50)).await;
    let session_id = app.start_checkout(product.id, 2, session_id, 2500).await;
    app.mock_settlement(&session_id, "pi_reconcile").await;

    let response = app
        .deliver("checkout.session.completed", json!({ "id": session_id }))
        .await;
    // settlement is acknowledged even though the order could not be written
    assert_eq!(response.status(), 200);
    session_id
}

#[tokio::test]
async fn failed_materialization_keeps_payment_and_flags_checkout() {
    let app = TestApp::with_failing_materializer(1).await;
    let session_id = settled_without_order(&app, "cs_flagged").await;

    let checkout = app.checkout(&session_id).await;
    assert_eq!(checkout.status, CheckoutStatus::Succeeded);
    assert!(checkout.order_id.is_none());
    assert_eq!(
        checkout.fulfillment_error.as_deref(),
        Some("Internal error: order store unavailable")
    );
    assert!(app.orders_for(checkout.id).await.is_empty());

    // redelivery does not retry; the checkout already left pending
    app.deliver("checkout.session.completed", json!({ "id": session_id }))
        .await;
    assert_eq!(app.materializer.calls(), 1);
}

#[tokio::test]
async fn reconciliation_creates_the_missing_order_once() {
    let app = TestApp::with_failing_materializer(1).await;
    let session_id = settled_without_order(&app, "cs_recover").await;

    let response = app
        .request_as_admin(Method::POST, "/api/v1/admin/checkouts/reconcile")
        .await;
    assert_eq!(response.status(), 200);
    let report = response_json(response).await;
    assert_eq!(report, json!({ "attempted": 1, "fulfilled": 1, "failed": 0 }));

    let checkout = app.checkout(&session_id).await;
    let orders = app.orders_for(checkout.id).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(checkout.order_id, Some(orders[0].id));
    assert!(checkout.fulfillment_error.is_none());
    assert_eq!(orders[0].total_minor_units, 2500);

    let response = app
        .request_as_admin(Method::POST, "/api/v1/admin/checkouts/reconcile?limit=10")
        .await;
    let report = response_json(response).await;
    assert_eq!(report["attempted"], 0);
    assert_eq!(app.materializer.calls(), 2);
}

#[tokio::test]
async fn reconciliation_reports_repeated_failures() {
    let app = TestApp::with_failing_materializer(2).await;
    settled_without_order(&app, "cs_still_down").await;

    let response = app
        .request_as_admin(Method::POST, "/api/v1/admin/checkouts/reconcile")
        .await;
    let report = response_json(response).await;
    assert_eq!(report, json!({ "attempted": 1, "fulfilled": 0, "failed": 1 }));
}

#[tokio::test]
async fn reconciliation_requires_the_admin_role() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(Method::POST, "/api/v1/admin/checkouts/reconcile", None)
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request_with_token(Method::POST, "/api/v1/admin/checkouts/reconcile", None, None)
        .await;
    assert_eq!(response.status(), 401);
}
