use crate::{
    db::DbPool,
    entities::commerce::{CheckoutLineItem, CheckoutModel},
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Cart metadata captured at checkout creation, handed over once payment settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFromCheckout {
    pub checkout_id: Uuid,
    pub buyer_id: Uuid,
    pub total_minor_units: i64,
    pub currency: String,
    pub customer_name: String,
    pub customer_contact: String,
    pub delivery_address: String,
    pub billing_address: Option<String>,
    pub payment_method: Option<String>,
    pub line_items: Vec<CheckoutLineItem>,
}

impl From<&CheckoutModel> for OrderFromCheckout {
    fn from(checkout: &CheckoutModel) -> Self {
        Self {
            checkout_id: checkout.id,
            buyer_id: checkout.buyer_id,
            total_minor_units: checkout.total_minor_units,
            currency: checkout.currency.clone(),
            customer_name: checkout.customer_name.clone(),
            customer_contact: checkout.customer_contact.clone(),
            delivery_address: checkout.delivery_address.clone(),
            billing_address: checkout.billing_address.clone(),
            payment_method: checkout.payment_method.clone(),
            line_items: checkout.line_items.0.clone(),
        }
    }
}

/// Creates the durable order for a settled checkout.
///
/// Implementations must be idempotent per checkout: a second call for the same checkout returns
/// the order created by the first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderMaterializer: Send + Sync {
    async fn create_from_checkout(
        &self,
        request: OrderFromCheckout,
    ) -> Result<OrderModel, ServiceError>;
}

/// Service for managing orders
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_by_checkout_id(
        &self,
        checkout_id: Uuid,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::CheckoutId.eq(checkout_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    fn order_number(checkout_id: Uuid) -> String {
        format!("ORD-{}", checkout_id.simple().to_string().to_uppercase())
    }
}

#[async_trait]
impl OrderMaterializer for OrderService {
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    async fn create_from_checkout(
        &self,
        request: OrderFromCheckout,
    ) -> Result<OrderModel, ServiceError> {
        if let Some(existing) = self.find_by_checkout_id(request.checkout_id).await? {
            info!(order_id = %existing.id, "Order already exists for checkout");
            return Ok(existing);
        }

        if request.line_items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "checkout has no line items".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(Self::order_number(request.checkout_id)),
            checkout_id: Set(request.checkout_id),
            customer_id: Set(request.buyer_id),
            status: Set("paid".to_string()),
            total_minor_units: Set(request.total_minor_units),
            currency: Set(request.currency.clone()),
            customer_name: Set(request.customer_name.clone()),
            customer_contact: Set(request.customer_contact.clone()),
            shipping_address: Set(request.delivery_address.clone()),
            billing_address: Set(request.billing_address.clone()),
            payment_method: Set(request.payment_method.clone()),
            created_at: Set(Utc::now()),
        };

        let txn = self.db_pool.begin().await?;

        let order = match order.insert(&txn).await {
            Ok(order) => order,
            Err(e) => {
                let err = ServiceError::DatabaseError(e);
                if err.is_unique_violation() {
                    // a concurrent call created it first
                    txn.rollback().await?;
                    warn!("Lost order creation race; returning existing order");
                    return self
                        .find_by_checkout_id(request.checkout_id)
                        .await?
                        .ok_or(err);
                }
                return Err(err);
            }
        };

        for (position, item) in request.line_items.iter().enumerate() {
            let total = crate::services::commerce::pricing::line_total(
                item.unit_price_minor_units,
                item.quantity,
            )
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!("line total overflows for {}", item.name))
            })?;

            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_reference: Set(item.product_reference.clone()),
                name: Set(item.name.clone()),
                quantity: Set(i32::try_from(item.quantity).map_err(|_| {
                    ServiceError::InvalidInput(format!("quantity too large for {}", item.name))
                })?),
                unit_price_minor_units: Set(item.unit_price_minor_units),
                total_minor_units: Set(total),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, "Order created from checkout");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::repositories::{CheckoutRepository, CheckoutStore, NewCheckout};
    use serde_json::json;

    async fn setup() -> (OrderService, CheckoutRepository) {
        let pool = Arc::new(
            establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
                sqlx_logging: false,
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        run_migrations(&pool).await.unwrap();
        (OrderService::new(pool.clone()), CheckoutRepository::new(pool))
    }

    async fn settled_checkout(store: &CheckoutRepository) -> CheckoutModel {
        store
            .save(NewCheckout {
                id: Uuid::new_v4(),
                session_id: format!("sess_{}", Uuid::new_v4().simple()),
                buyer_id: Uuid::new_v4(),
                line_items: vec![
                    CheckoutLineItem {
                        product_id: Uuid::new_v4(),
                        product_reference: "prod_a".into(),
                        name: "A".into(),
                        quantity: 2,
                        unit_price_minor_units: 1000,
                    },
                    CheckoutLineItem {
                        product_id: Uuid::new_v4(),
                        product_reference: "prod_b".into(),
                        name: "B".into(),
                        quantity: 1,
                        unit_price_minor_units: 250,
                    },
                ],
                total_minor_units: 2250,
                currency: "usd".into(),
                raw_gateway_session: json!({}),
                customer_name: "Grace".into(),
                customer_contact: "grace@example.com".into(),
                delivery_address: "2 Side St".into(),
                billing_address: Some("PO Box 1".into()),
                payment_method: Some("card".into()),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_order_with_items_in_checkout_order() {
        let (orders, store) = setup().await;
        let checkout = settled_checkout(&store).await;

        let order = orders
            .create_from_checkout(OrderFromCheckout::from(&checkout))
            .await
            .unwrap();
        assert_eq!(order.checkout_id, checkout.id);
        assert_eq!(order.customer_id, checkout.buyer_id);
        assert_eq!(order.total_minor_units, 2250);
        assert_eq!(order.shipping_address, "2 Side St");

        let items = orders.get_order_items(order.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "A");
        assert_eq!(items[0].total_minor_units, 2000);
        assert_eq!(items[1].unit_price_minor_units, 250);
    }

    #[tokio::test]
    async fn second_call_returns_the_same_order() {
        let (orders, store) = setup().await;
        let checkout = settled_checkout(&store).await;

        let first = orders
            .create_from_checkout(OrderFromCheckout::from(&checkout))
            .await
            .unwrap();
        let second = orders
            .create_from_checkout(OrderFromCheckout::from(&checkout))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(orders.get_order_items(first.id).await.unwrap().len(), 2);
    }
    #[test]
    fn order_numbers_carry_the_whole_checkout_id() {
        // ids sharing a 12-character prefix must still get distinct numbers
        let a = Uuid::from_u128(0x1234_5678_9abc_0000_0000_0000_0000_0001);
        let b = Uuid::from_u128(0x1234_5678_9abc_0000_0000_0000_0000_0002);
        assert_ne!(OrderService::order_number(a), OrderService::order_number(b));
        assert_eq!(
            OrderService::order_number(a),
            format!("ORD-{}", a.simple().to_string().to_uppercase())
        );
    }
}
