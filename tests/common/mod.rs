#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{commerce::CheckoutModel, order, product},
    errors::ServiceError,
    events::{self, EventSender},
    gateway::{
        stripe::{signature_header, SIGNATURE_HEADER},
        StripeConfig, StripeGateway,
    },
    handlers::AppServices,
    repositories::{CheckoutRepository, CheckoutStore},
    services::{
        commerce::{CheckoutService, CreateProductInput},
        orders::{OrderFromCheckout, OrderMaterializer},
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
const JWT_SECRET: &str = "integration_test_secret_key_that_is_long_enough_0123456789";

/// Order materializer wrapper that counts calls and can fail the first `n` of them.
pub struct FlakyMaterializer {
    inner: Arc<dyn OrderMaterializer>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyMaterializer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderMaterializer for FlakyMaterializer {
    async fn create_from_checkout(
        &self,
        request: OrderFromCheckout,
    ) -> Result<order::Model, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::InternalError(
                "order store unavailable".to_string(),
            ));
        }
        self.inner.create_from_checkout(request).await
    }
}

/// Application wired against in-memory SQLite and a wiremock payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    pub materializer: Arc<FlakyMaterializer>,
    pub buyer_id: Uuid,
    buyer_token: String,
    admin_token: String,
    store: CheckoutRepository,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_failing_materializer(0).await
    }

    /// The first `failures` order materializations fail.
    pub async fn with_failing_materializer(failures: usize) -> Self {
        let gateway_server = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_gateway_api_base = gateway_server.uri();
        cfg.payment_gateway_secret_key = Some("sk_test_integration".to_string());
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel();
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(
            StripeGateway::new(StripeConfig::from_app_config(&cfg)).expect("gateway client"),
        );

        let mut services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            gateway.clone(),
            &cfg.default_currency,
        );
        let materializer = Arc::new(FlakyMaterializer {
            inner: services.order.clone(),
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        });
        services.checkout = Arc::new(CheckoutService::new(
            Arc::new(CheckoutRepository::new(db_arc.clone())),
            gateway,
            services.product_catalog.clone(),
            materializer.clone(),
            event_sender.clone(),
            cfg.default_currency.clone(),
        ));

        let auth_service = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));
        let buyer_id = Uuid::new_v4();
        let buyer_token = auth_service
            .generate_token(
                buyer_id,
                Some("buyer@example.com".to_string()),
                vec![],
                chrono::Duration::hours(1),
            )
            .expect("buyer token");
        let admin_token = auth_service
            .generate_token(
                Uuid::new_v4(),
                None,
                vec!["admin".to_string()],
                chrono::Duration::hours(1),
            )
            .expect("admin token");

        let state = AppState {
            db: db_arc.clone(),
            config: Arc::new(cfg),
            event_sender,
            auth: auth_service,
            services,
        };

        Self {
            router: storefront_api::build_router(state.clone()),
            state,
            gateway: gateway_server,
            materializer,
            buyer_id,
            buyer_token,
            admin_token,
            store: CheckoutRepository::new(db_arc),
            _event_task: event_task,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.state
            .services
            .product_catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                description: None,
                price,
                gateway_product_ref: format!("prod_{name}"),
                is_active: true,
            })
            .await
            .expect("seed product")
    }

    /// Gateway answers the next session creation with `session_id`
    pub async fn mock_session(&self, session_id: &str, amount_total: i64) {
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": session_id,
                "object": "checkout.session",
                "url": format!("https://checkout.example/pay/{session_id}"),
                "amount_total": amount_total,
                "currency": "usd",
                "created": 1_700_000_000,
                "payment_status": "unpaid"
            })))
            .up_to_n_times(1)
            .mount(&self.gateway)
            .await;
    }

    /// Gateway returns settled details for `session_id`
    pub async fn mock_settlement(&self, session_id: &str, payment_intent: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/checkout/sessions/{session_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": session_id,
                "object": "checkout.session",
                "payment_status": "paid",
                "customer_details": { "email": "buyer@example.com", "name": "Ada Buyer" },
                "payment_intent": {
                    "id": payment_intent,
                    "payment_method": { "id": "pm_1", "type": "card", "card": { "last4": "4242" } }
                }
            })))
            .mount(&self.gateway)
            .await;
    }

    /// Creates a checkout for one product line and returns the gateway session id
    pub async fn start_checkout(
        &self,
        product_id: Uuid,
        quantity: u32,
        session_id: &str,
        amount_total: i64,
    ) -> String {
        self.mock_session(session_id, amount_total).await;
        let response = self
            .request_authenticated(
                Method::POST,
                "/api/v1/checkout",
                Some(cart_payload(product_id, quantity)),
            )
            .await;
        assert_eq!(response.status(), 201, "checkout creation failed");
        let body = response_json(response).await;
        body["sessionId"].as_str().expect("session id").to_string()
    }

    pub fn event_payload(event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "object": "event",
            "type": event_type,
            "data": { "object": object }
        }))
        .expect("event json")
    }

    /// Delivers a correctly signed notification
    pub async fn deliver(&self, event_type: &str, object: Value) -> Response {
        let payload = Self::event_payload(event_type, object);
        let signature = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &payload);
        self.deliver_raw(payload, Some(&signature)).await
    }

    pub async fn deliver_raw(&self, payload: Vec<u8>, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(payload)).expect("request"))
            .await
    }

    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.request_with_token(method, uri, body, Some(&self.buyer_token))
            .await
    }

    pub async fn request_as_admin(&self, method: Method, uri: &str) -> Response {
        self.request_with_token(method, uri, None, Some(&self.admin_token))
            .await
    }

    pub async fn request_with_token(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn checkout(&self, session_id: &str) -> CheckoutModel {
        self.store
            .find_by_session_id(session_id)
            .await
            .expect("checkout query")
            .expect("checkout exists")
    }

    pub async fn checkout_count(&self) -> u64 {
        storefront_api::entities::commerce::Checkout::find()
            .count(&*self.state.db)
            .await
            .expect("count checkouts")
    }

    pub async fn orders_for(&self, checkout_id: Uuid) -> Vec<order::Model> {
        order::Entity::find()
            .filter(order::Column::CheckoutId.eq(checkout_id))
            .all(&*self.state.db)
            .await
            .expect("orders query")
    }
}

pub fn cart_payload(product_id: Uuid, quantity: u32) -> Value {
    json!({
        "items": [{ "productId": product_id, "quantity": quantity }],
        "customerName": "Ada Buyer",
        "customerContact": "buyer@example.com",
        "deliveryAddress": "1 Main St, Springfield",
        "paymentMethod": "card"
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
