//! Integration tests for checkout creation and the buyer-facing checkout view.

mod common;

use axum::http::Method;
use common::{cart_payload, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::commerce::CheckoutStatus;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn create_checkout_returns_gateway_session_url() {
    let app = TestApp::new().await;
    let product = app.seed_product("mug", dec!(10.00)).await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains("unit_amount%5D=1000"))
        .and(body_string_contains("quantity%5D=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_flow",
            "url": "https://checkout.example/pay/cs_test_flow",
            "amount_total": 2000,
            "currency": "usd",
            "created": 1_700_000_000
        })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 2)),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert_eq!(
        body["sessionUrl"],
        "https://checkout.example/pay/cs_test_flow"
    );

    let checkout = app.checkout("cs_test_flow").await;
    assert_eq!(checkout.status, CheckoutStatus::Pending);
    assert_eq!(checkout.buyer_id, app.buyer_id);
    assert_eq!(checkout.total_minor_units, 2000);
    assert_eq!(checkout.created_at.timestamp(), 1_700_000_000);
    assert_eq!(checkout.line_items.0[0].unit_price_minor_units, 1000);
    assert_eq!(checkout.delivery_address, "1 Main St, Springfield");
}

#[tokio::test]
async fn half_cent_prices_round_up() {
    let app = TestApp::new().await;
    let product = app.seed_product("pen", dec!(19.125)).await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("unit_amount%5D=1913"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_round",
            "url": "https://checkout.example/pay/cs_round",
            "amount_total": 1913,
            "currency": "usd",
            "created": 1_700_000_000
        })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 1)),
        )
        .await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn unknown_product_is_rejected_before_the_gateway() {
    let app = TestApp::new().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&app.gateway)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(Uuid::new_v4(), 1)),
        )
        .await;
    assert_eq!(response.status(), 404);
    assert_eq!(app.checkout_count().await, 0);
}

#[tokio::test]
async fn invalid_carts_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("lamp", dec!(30.00)).await;

    let mut empty = cart_payload(product.id, 1);
    empty["items"] = json!([]);
    let response = app
        .request_authenticated(Method::POST, "/api/v1/checkout", Some(empty))
        .await;
    assert_eq!(response.status(), 400);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 0)),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(app.checkout_count().await, 0);
}

#[tokio::test]
async fn gateway_outage_surfaces_as_unavailable_without_persisting() {
    let app = TestApp::new().await;
    let product = app.seed_product("desk", dec!(250.00)).await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&app.gateway)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 1)),
        )
        .await;
    assert_eq!(response.status(), 503);

    let body = response_json(response).await;
    assert_eq!(body["message"], "Service temporarily unavailable");
    assert_eq!(app.checkout_count().await, 0);
}

#[tokio::test]
async fn gateway_rejection_does_not_leak_provider_text() {
    let app = TestApp::new().await;
    let product = app.seed_product("chair", dec!(80.00)).await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "No such price: secret internals" }
        })))
        .mount(&app.gateway)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 1)),
        )
        .await;
    assert_eq!(response.status(), 502);

    let body = response_json(response).await;
    assert!(!body.to_string().contains("secret internals"));
}

#[tokio::test]
async fn checkout_requires_a_bearer_token() {
    let app = TestApp::new().await;
    let product = app.seed_product("cup", dec!(4.00)).await;

    let response = app
        .request_with_token(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 1)),
            None,
        )
        .await;
    assert_eq!(response.status(), 401);

    let response = app
        .request_with_token(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(product.id, 1)),
            Some("not-a-jwt"),
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn buyers_only_see_their_own_checkouts() {
    let app = TestApp::new().await;
    let product = app.seed_product("book", dec!(15.00)).await;
    let session_id = app
        .start_checkout(product.id, 3, "cs_view", 4500)
        .await;

    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/checkout/{session_id}"), None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["totalMinorUnits"], 4500);
    assert_eq!(body["lineItems"][0]["quantity"], 3);
    assert!(body.get("rawGatewaySession").is_none());

    // the admin token belongs to a different buyer id
    let response = app
        .request_as_admin(Method::GET, &format!("/api/v1/checkout/{session_id}"))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn price_changes_do_not_affect_existing_checkouts() {
    let app = TestApp::new().await;
    let product = app.seed_product("vase", dec!(10.00)).await;
    let session_id = app.start_checkout(product.id, 2, "cs_frozen", 2000).await;

    app.state
        .services
        .product_catalog
        .update_price(product.id, dec!(12.00))
        .await
        .unwrap();

    app.mock_settlement(&session_id, "pi_frozen").await;
    let response = app
        .deliver(
            "checkout.session.completed",
            json!({ "id": session_id, "payment_intent": "pi_frozen" }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let checkout = app.checkout(&session_id).await;
    let order_id = checkout.order_id.expect("order linked");
    let items = app
        .state
        .services
        .order
        .get_order_items(order_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unit_price_minor_units, 1000);
    assert_eq!(items[0].total_minor_units, 2000);
}
