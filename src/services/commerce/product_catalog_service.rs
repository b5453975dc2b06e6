use crate::{entities::product, errors::ServiceError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Authoritative price and gateway reference for one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub product_id: Uuid,
    pub name: String,
    pub gateway_product_ref: String,
    /// Major currency units
    pub unit_price: Decimal,
}

impl From<product::Model> for CatalogEntry {
    fn from(model: product::Model) -> Self {
        Self {
            product_id: model.id,
            name: model.name,
            gateway_product_ref: model.gateway_product_ref,
            unit_price: model.price,
        }
    }
}

/// Price lookup used when a cart is turned into a checkout
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// `None` when the product does not exist or is not for sale
    async fn lookup(&self, product_id: Uuid) -> Result<Option<CatalogEntry>, ServiceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub gateway_product_ref: String,
    pub is_active: bool,
}

/// Product catalog service backed by the `products` table
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new product
    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.price.is_sign_negative() && !input.price.is_zero() {
            return Err(ServiceError::InvalidInput(
                "price must not be negative".to_string(),
            ));
        }

        let product_id = Uuid::new_v4();
        let now = Utc::now();

        let product = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name),
            description: Set(input.description),
            price: Set(input.price),
            gateway_product_ref: Set(input.gateway_product_ref),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let product = product.insert(&*self.db).await?;
        info!("Created product: {}", product_id);
        Ok(product)
    }

    /// Changes the list price. Existing checkouts keep the price they were created with.
    #[instrument(skip(self))]
    pub async fn update_price(
        &self,
        product_id: Uuid,
        price: Decimal,
    ) -> Result<product::Model, ServiceError> {
        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();
        active.price = Set(price);
        active.updated_at = Set(Utc::now());

        let product = active.update(&*self.db).await?;
        info!("Updated price of product {}", product_id);
        Ok(product)
    }

    /// Get a product by ID
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))
    }
}

#[async_trait]
impl CatalogLookup for ProductCatalogService {
    async fn lookup(&self, product_id: Uuid) -> Result<Option<CatalogEntry>, ServiceError> {
        let product = product::Entity::find_by_id(product_id).one(&*self.db).await?;
        Ok(product
            .filter(|p| p.is_active)
            .map(CatalogEntry::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use rust_decimal_macros::dec;

    async fn catalog() -> ProductCatalogService {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            sqlx_logging: false,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        ProductCatalogService::new(Arc::new(pool))
    }

    fn input(name: &str, price: Decimal, is_active: bool) -> CreateProductInput {
        CreateProductInput {
            name: name.to_string(),
            description: None,
            price,
            gateway_product_ref: format!("prod_{name}"),
            is_active,
        }
    }

    #[tokio::test]
    async fn lookup_returns_active_products_only() {
        let catalog = catalog().await;
        let active = catalog
            .create_product(input("mug", dec!(12.50), true))
            .await
            .unwrap();
        let retired = catalog
            .create_product(input("poster", dec!(5.00), false))
            .await
            .unwrap();

        let entry = catalog.lookup(active.id).await.unwrap().unwrap();
        assert_eq!(entry.unit_price, dec!(12.50));
        assert_eq!(entry.gateway_product_ref, "prod_mug");

        assert!(catalog.lookup(retired.id).await.unwrap().is_none());
        assert!(catalog.lookup(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_price_changes_future_lookups() {
        let catalog = catalog().await;
        let product = catalog
            .create_product(input("lamp", dec!(30.00), true))
            .await
            .unwrap();

        catalog.update_price(product.id, dec!(35.00)).await.unwrap();
        let entry = catalog.lookup(product.id).await.unwrap().unwrap();
        assert_eq!(entry.unit_price, dec!(35.00));
    }

    #[tokio::test]
    async fn rejects_invalid_products() {
        let catalog = catalog().await;
        assert!(catalog
            .create_product(input("", dec!(1.00), true))
            .await
            .is_err());
        assert!(catalog
            .create_product(input("neg", dec!(-1.00), true))
            .await
            .is_err());
    }
}
