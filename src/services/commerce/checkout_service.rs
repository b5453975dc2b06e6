use crate::{
    entities::commerce::{CheckoutLineItem, CheckoutModel, CheckoutStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreateSessionRequest, GatewayEvent, GatewayLineItem, NotificationKind, PaymentGateway},
    metrics,
    repositories::{CheckoutStore, NewCheckout, StatusUpdate},
    services::commerce::{
        checkout_state::{self, Transition},
        pricing,
        product_catalog_service::CatalogLookup,
    },
    services::orders::{OrderFromCheckout, OrderMaterializer},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const MAX_LINE_QUANTITY: u32 = 10_000;
const DEFAULT_RECONCILE_BATCH: u64 = 100;

/// One cart line as submitted by the buyer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutInput {
    #[validate(length(min = 1, max = 100, message = "cart must contain between 1 and 100 lines"))]
    pub items: Vec<CartLine>,
    #[validate(length(min = 1, max = 255))]
    pub customer_name: String,
    #[validate(length(min = 1, max = 255))]
    pub customer_contact: String,
    #[validate(length(min = 1, max = 1000))]
    pub delivery_address: String,
    #[validate(length(max = 1000))]
    pub billing_address: Option<String>,
    #[validate(length(max = 64))]
    pub payment_method: Option<String>,
}

impl CreateCheckoutInput {
    /// Field checks plus per-line quantity bounds
    pub fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if let Some(line) = self
            .items
            .iter()
            .find(|line| line.quantity == 0 || line.quantity > MAX_LINE_QUANTITY)
        {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be between 1 and {}",
                line.product_id, MAX_LINE_QUANTITY
            )));
        }
        Ok(())
    }
}

/// Result of a successful `create_checkout`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedCheckout {
    pub checkout_id: Uuid,
    pub session_id: String,
    pub session_url: String,
}

/// How a notification was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Signature or timestamp check failed
    Rejected,
    /// Event type the state machine does not handle
    Unhandled { event_type: String },
    /// No local checkout matches the event
    UnknownCheckout,
    /// Already applied, or a concurrent delivery applied it first
    Duplicate { status: CheckoutStatus },
    /// Not a valid move from the current status
    Ignored {
        status: CheckoutStatus,
        kind: NotificationKind,
    },
    Applied {
        checkout_id: Uuid,
        from: CheckoutStatus,
        to: CheckoutStatus,
    },
}

impl NotificationOutcome {
    fn label(&self) -> &'static str {
        match self {
            NotificationOutcome::Rejected => "rejected",
            NotificationOutcome::Unhandled { .. } => "unhandled",
            NotificationOutcome::UnknownCheckout => "unknown_checkout",
            NotificationOutcome::Duplicate { .. } => "duplicate",
            NotificationOutcome::Ignored { .. } => "ignored",
            NotificationOutcome::Applied { .. } => "applied",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub fulfilled: usize,
    pub failed: usize,
}

/// Checkout orchestrator: prices carts, opens gateway sessions and settles them from notifications
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn CheckoutStore>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn CatalogLookup>,
    materializer: Arc<dyn OrderMaterializer>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn CatalogLookup>,
        materializer: Arc<dyn OrderMaterializer>,
        event_sender: Arc<EventSender>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
            materializer,
            event_sender,
            currency: currency.into(),
        }
    }

    /// Prices the cart, opens a gateway session and records a pending checkout.
    #[instrument(skip(self, input), fields(lines = input.items.len()))]
    pub async fn create_checkout(
        &self,
        buyer_id: Uuid,
        input: CreateCheckoutInput,
    ) -> Result<CreatedCheckout, ServiceError> {
        input.check()?;

        let line_items = self.price_cart(&input.items).await?;
        let checkout_id = Uuid::new_v4();

        let request = CreateSessionRequest {
            checkout_id,
            buyer_id,
            currency: self.currency.clone(),
            customer_email: input
                .customer_contact
                .contains('@')
                .then(|| input.customer_contact.clone()),
            line_items: line_items
                .iter()
                .map(|line| GatewayLineItem {
                    product_reference: line.product_reference.clone(),
                    quantity: line.quantity,
                    unit_amount_minor: line.unit_price_minor_units,
                })
                .collect(),
        };

        let session = self.gateway.create_session(request).await.map_err(|e| {
            error!(checkout_id = %checkout_id, error = %e, "Gateway session creation failed");
            metrics::CHECKOUT_SESSION_FAILURES.inc();
            ServiceError::from(e)
        })?;

        let new_checkout = NewCheckout {
            id: checkout_id,
            session_id: session.id.clone(),
            buyer_id,
            line_items,
            total_minor_units: session.amount_total_minor,
            currency: session.currency.clone(),
            raw_gateway_session: session.raw.clone(),
            customer_name: input.customer_name,
            customer_contact: input.customer_contact,
            delivery_address: input.delivery_address,
            billing_address: input.billing_address,
            payment_method: input.payment_method,
            created_at: session.created_at,
        };

        let checkout = match self.store.save(new_checkout).await {
            Ok(checkout) => checkout,
            Err(e) => {
                metrics::CHECKOUT_SESSION_FAILURES.inc();
                // the session is already recorded under another checkout; leave it payable
                if matches!(e, ServiceError::Conflict(_)) {
                    warn!(
                        checkout_id = %checkout_id,
                        session_id = %session.id,
                        "Gateway session already recorded; not expiring it"
                    );
                    return Err(e);
                }
                error!(
                    checkout_id = %checkout_id,
                    session_id = %session.id,
                    error = %e,
                    "Failed to persist checkout; expiring gateway session"
                );
                if let Err(expire_err) = self.gateway.expire_session(&session.id).await {
                    warn!(
                        session_id = %session.id,
                        error = %expire_err,
                        "Could not expire orphaned gateway session"
                    );
                }
                return Err(e);
            }
        };

        metrics::CHECKOUT_SESSIONS_CREATED.inc();
        self.event_sender
            .send_or_log(Event::CheckoutCreated {
                checkout_id: checkout.id,
                session_id: checkout.session_id.clone(),
                buyer_id,
                total_minor_units: checkout.total_minor_units,
                currency: checkout.currency.clone(),
            })
            .await;

        info!(
            checkout_id = %checkout.id,
            session_id = %checkout.session_id,
            total_minor_units = checkout.total_minor_units,
            "Checkout created"
        );

        Ok(CreatedCheckout {
            checkout_id: checkout.id,
            session_id: checkout.session_id,
            session_url: session.url,
        })
    }

    async fn price_cart(&self, items: &[CartLine]) -> Result<Vec<CheckoutLineItem>, ServiceError> {
        let mut priced = Vec::with_capacity(items.len());
        for line in items {
            let entry = self
                .catalog
                .lookup(line.product_id)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(line.product_id.to_string()))?;

            priced.push(CheckoutLineItem {
                product_id: entry.product_id,
                product_reference: entry.gateway_product_ref,
                name: entry.name,
                quantity: line.quantity,
                unit_price_minor_units: pricing::to_minor_units(entry.unit_price)?,
            });
        }
        Ok(priced)
    }

    /// Verifies and applies one gateway notification.
    ///
    /// Errors are returned only when the checkout store is unavailable. Everything else,
    /// including fulfillment failures, is absorbed into the outcome.
    #[instrument(skip(self, payload, signature), fields(payload_len = payload.len()))]
    pub async fn handle_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<NotificationOutcome, ServiceError> {
        let outcome = self.dispatch_notification(payload, signature).await;
        match &outcome {
            Ok(outcome) => metrics::record_notification(outcome.label()),
            Err(_) => metrics::record_notification("error"),
        }
        outcome
    }

    async fn dispatch_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<NotificationOutcome, ServiceError> {
        let Some(event) = self.gateway.verify_notification(payload, signature).await else {
            warn!("Rejected payment notification with invalid signature");
            return Ok(NotificationOutcome::Rejected);
        };

        let Some(kind) = event.kind() else {
            info!(event_type = %event.event_type, event_id = ?event.id, "Ignoring unhandled notification type");
            return Ok(NotificationOutcome::Unhandled {
                event_type: event.event_type,
            });
        };

        let Some(checkout) = self.find_target(&event, kind).await? else {
            warn!(event_type = %event.event_type, event_id = ?event.id, "No checkout matches notification");
            return Ok(NotificationOutcome::UnknownCheckout);
        };

        match checkout_state::next(checkout.status, kind) {
            Transition::Duplicate => {
                debug!(checkout_id = %checkout.id, status = %checkout.status, "Duplicate notification");
                Ok(NotificationOutcome::Duplicate {
                    status: checkout.status,
                })
            }
            Transition::Ignore => {
                info!(
                    checkout_id = %checkout.id,
                    status = %checkout.status,
                    event_type = %kind,
                    "Notification does not apply to current status"
                );
                Ok(NotificationOutcome::Ignored {
                    status: checkout.status,
                    kind,
                })
            }
            Transition::Apply { from, to } => self.apply(&checkout, &event, from, to).await,
        }
    }

    async fn find_target(
        &self,
        event: &GatewayEvent,
        kind: NotificationKind,
    ) -> Result<Option<CheckoutModel>, ServiceError> {
        if kind == NotificationKind::ChargeRefunded {
            return match event.payment_intent_id() {
                Some(intent) => self.store.find_by_payment_intent_id(intent).await,
                None => Ok(None),
            };
        }

        match event.session_id() {
            Some(session_id) => self.store.find_by_session_id(session_id).await,
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        checkout: &CheckoutModel,
        event: &GatewayEvent,
        from: CheckoutStatus,
        to: CheckoutStatus,
    ) -> Result<NotificationOutcome, ServiceError> {
        let update = match to {
            CheckoutStatus::Succeeded => self.settlement_update(checkout, event).await,
            // a refund event carries a charge, not a session
            CheckoutStatus::Refunded => StatusUpdate::default(),
            _ => StatusUpdate {
                raw_gateway_session: Some(event.object.clone()),
                ..Default::default()
            },
        };

        let applied = self
            .store
            .update_status(&checkout.session_id, from, to, update)
            .await?;

        if !applied {
            debug!(checkout_id = %checkout.id, "Concurrent delivery already moved this checkout");
            return Ok(NotificationOutcome::Duplicate { status: to });
        }

        metrics::record_transition(&to.to_string());
        info!(
            checkout_id = %checkout.id,
            session_id = %checkout.session_id,
            from = %from,
            to = %to,
            "Checkout status changed"
        );

        let checkout_id = checkout.id;
        let session_id = checkout.session_id.clone();
        let domain_event = match to {
            CheckoutStatus::Succeeded => Some(Event::CheckoutSucceeded {
                checkout_id,
                session_id,
            }),
            CheckoutStatus::Failed => Some(Event::CheckoutFailed {
                checkout_id,
                session_id,
            }),
            CheckoutStatus::Cancelled => Some(Event::CheckoutCancelled {
                checkout_id,
                session_id,
            }),
            CheckoutStatus::Refunded => Some(Event::CheckoutRefunded {
                checkout_id,
                session_id,
            }),
            CheckoutStatus::Pending => None,
        };
        if let Some(domain_event) = domain_event {
            self.event_sender.send_or_log(domain_event).await;
        }

        if to == CheckoutStatus::Succeeded {
            self.fulfill(checkout).await;
        }

        Ok(NotificationOutcome::Applied {
            checkout_id: checkout.id,
            from,
            to,
        })
    }

    async fn settlement_update(&self, checkout: &CheckoutModel, event: &GatewayEvent) -> StatusUpdate {
        match self.gateway.fetch_settlement(&checkout.session_id).await {
            Ok(settlement) => StatusUpdate {
                billing_detail: Some(settlement.billing_detail),
                raw_gateway_session: Some(settlement.raw),
                payment_intent_id: settlement
                    .payment_intent_id
                    .or_else(|| event.payment_intent_id().map(str::to_string)),
            },
            Err(e) => {
                warn!(
                    session_id = %checkout.session_id,
                    error = %e,
                    "Settlement detail unavailable; recording notification payload only"
                );
                StatusUpdate {
                    billing_detail: None,
                    raw_gateway_session: Some(event.object.clone()),
                    payment_intent_id: event.payment_intent_id().map(str::to_string),
                }
            }
        }
    }

    /// Materializes the order for a settled checkout. Failures are recorded, never propagated.
    async fn fulfill(&self, checkout: &CheckoutModel) -> bool {
        match self
            .materializer
            .create_from_checkout(OrderFromCheckout::from(checkout))
            .await
        {
            Ok(order) => {
                if let Err(e) = self.store.mark_fulfilled(checkout.id, order.id).await {
                    error!(
                        checkout_id = %checkout.id,
                        order_id = %order.id,
                        error = %e,
                        "Order created but checkout could not be linked to it"
                    );
                }
                metrics::ORDERS_CREATED.inc();
                self.event_sender
                    .send_or_log(Event::OrderCreated {
                        order_id: order.id,
                        checkout_id: checkout.id,
                    })
                    .await;
                true
            }
            Err(e) => {
                error!(
                    checkout_id = %checkout.id,
                    session_id = %checkout.session_id,
                    alert = "settled_unfulfilled",
                    error = %e,
                    "Payment settled but order materialization failed"
                );
                metrics::FULFILLMENT_FAILURES.inc();
                if let Err(mark_err) = self
                    .store
                    .mark_unfulfilled(checkout.id, e.to_string())
                    .await
                {
                    error!(checkout_id = %checkout.id, error = %mark_err, "Could not record fulfillment failure");
                }
                self.event_sender
                    .send_or_log(Event::FulfillmentFailed {
                        checkout_id: checkout.id,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;
                false
            }
        }
    }

    /// Retries order materialization for settled checkouts that have no order.
    #[instrument(skip(self))]
    pub async fn reconcile_unfulfilled(
        &self,
        limit: Option<u64>,
    ) -> Result<ReconcileReport, ServiceError> {
        let pending = self
            .store
            .find_unfulfilled(limit.unwrap_or(DEFAULT_RECONCILE_BATCH))
            .await?;

        let mut report = ReconcileReport {
            attempted: pending.len(),
            ..Default::default()
        };
        for checkout in &pending {
            if self.fulfill(checkout).await {
                report.fulfilled += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            attempted = report.attempted,
            fulfilled = report.fulfilled,
            failed = report.failed,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// The buyer's own checkout. Other buyers' checkouts read as not found.
    pub async fn get_checkout(
        &self,
        buyer_id: Uuid,
        session_id: &str,
    ) -> Result<CheckoutModel, ServiceError> {
        self.store
            .find_by_session_id(session_id)
            .await?
            .filter(|checkout| checkout.buyer_id == buyer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Checkout {} not found", session_id)))
    }
}
