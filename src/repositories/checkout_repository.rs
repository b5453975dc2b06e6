use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::commerce::checkout::{
    ActiveModel as CheckoutActiveModel, CheckoutLineItem, CheckoutStatus, Column,
    Entity as Checkout, LineItems, Model as CheckoutModel,
};
use crate::errors::ServiceError;
use crate::repositories::{BaseRepository, Repository};

/// Everything needed to persist a freshly created checkout
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheckout {
    pub id: Uuid,
    pub session_id: String,
    pub buyer_id: Uuid,
    pub line_items: Vec<CheckoutLineItem>,
    pub total_minor_units: i64,
    pub currency: String,
    pub raw_gateway_session: Value,
    pub customer_name: String,
    pub customer_contact: String,
    pub delivery_address: String,
    pub billing_address: Option<String>,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Columns written alongside a status transition. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub billing_detail: Option<Value>,
    pub raw_gateway_session: Option<Value>,
    pub payment_intent_id: Option<String>,
}

/// Persistence port for checkouts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Inserts a pending checkout. A duplicate session id yields `ServiceError::Conflict`.
    async fn save(&self, checkout: NewCheckout) -> Result<CheckoutModel, ServiceError>;

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutModel>, ServiceError>;

    async fn find_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutModel>, ServiceError>;

    /// Moves `session_id` from `from` to `to` in a single conditional write.
    ///
    /// Returns `true` only for the caller whose write matched the expected current status.
    async fn update_status(
        &self,
        session_id: &str,
        from: CheckoutStatus,
        to: CheckoutStatus,
        update: StatusUpdate,
    ) -> Result<bool, ServiceError>;

    async fn mark_fulfilled(&self, checkout_id: Uuid, order_id: Uuid) -> Result<(), ServiceError>;

    async fn mark_unfulfilled(&self, checkout_id: Uuid, reason: String) -> Result<(), ServiceError>;

    /// Succeeded checkouts without an order, oldest first
    async fn find_unfulfilled(&self, limit: u64) -> Result<Vec<CheckoutModel>, ServiceError>;
}

/// SeaORM-backed checkout store
#[derive(Debug)]
pub struct CheckoutRepository {
    base: BaseRepository,
}

impl CheckoutRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl CheckoutStore for CheckoutRepository {
    #[instrument(skip(self, checkout), fields(session_id = %checkout.session_id))]
    async fn save(&self, checkout: NewCheckout) -> Result<CheckoutModel, ServiceError> {
        let now = Utc::now();
        let model = CheckoutActiveModel {
            id: Set(checkout.id),
            session_id: Set(checkout.session_id.clone()),
            buyer_id: Set(checkout.buyer_id),
            line_items: Set(LineItems(checkout.line_items)),
            total_minor_units: Set(checkout.total_minor_units),
            currency: Set(checkout.currency),
            status: Set(CheckoutStatus::Pending),
            billing_detail: Set(None),
            raw_gateway_session: Set(checkout.raw_gateway_session),
            payment_intent_id: Set(None),
            customer_name: Set(checkout.customer_name),
            customer_contact: Set(checkout.customer_contact),
            delivery_address: Set(checkout.delivery_address),
            billing_address: Set(checkout.billing_address),
            payment_method: Set(checkout.payment_method),
            order_id: Set(None),
            fulfillment_error: Set(None),
            created_at: Set(checkout.created_at),
            updated_at: Set(now),
        };

        model.insert(self.base.get_db()).await.map_err(|e| {
            let err = ServiceError::DatabaseError(e);
            if err.is_unique_violation() {
                ServiceError::Conflict(format!(
                    "checkout for session {} already exists",
                    checkout.session_id
                ))
            } else {
                err
            }
        })
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutModel>, ServiceError> {
        Checkout::find()
            .filter(Column::SessionId.eq(session_id))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutModel>, ServiceError> {
        Checkout::find()
            .filter(Column::PaymentIntentId.eq(payment_intent_id))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self, update))]
    async fn update_status(
        &self,
        session_id: &str,
        from: CheckoutStatus,
        to: CheckoutStatus,
        update: StatusUpdate,
    ) -> Result<bool, ServiceError> {
        let mut patch = CheckoutActiveModel {
            status: Set(to),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(detail) = update.billing_detail {
            patch.billing_detail = Set(Some(detail));
        }
        if let Some(raw) = update.raw_gateway_session {
            patch.raw_gateway_session = Set(raw);
        }
        if let Some(intent) = update.payment_intent_id {
            patch.payment_intent_id = Set(Some(intent));
        }

        let result = Checkout::update_many()
            .set(patch)
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::Status.eq(from))
            .exec(self.base.get_db())
            .await?;

        debug!(rows_affected = result.rows_affected, "conditional status update");
        Ok(result.rows_affected == 1)
    }

    async fn mark_fulfilled(&self, checkout_id: Uuid, order_id: Uuid) -> Result<(), ServiceError> {
        Checkout::update_many()
            .set(CheckoutActiveModel {
                order_id: Set(Some(order_id)),
                fulfillment_error: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Column::Id.eq(checkout_id))
            .exec(self.base.get_db())
            .await?;
        Ok(())
    }

    async fn mark_unfulfilled(&self, checkout_id: Uuid, reason: String) -> Result<(), ServiceError> {
        Checkout::update_many()
            .set(CheckoutActiveModel {
                fulfillment_error: Set(Some(reason)),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Column::Id.eq(checkout_id))
            .filter(Column::OrderId.is_null())
            .exec(self.base.get_db())
            .await?;
        Ok(())
    }

    async fn find_unfulfilled(&self, limit: u64) -> Result<Vec<CheckoutModel>, ServiceError> {
        Checkout::find()
            .filter(Column::Status.eq(CheckoutStatus::Succeeded))
            .filter(Column::OrderId.is_null())
            .order_by_asc(Column::UpdatedAt)
            .limit(limit)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}
