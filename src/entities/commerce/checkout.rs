use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// A priced line frozen at checkout creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLineItem {
    pub product_id: Uuid,
    pub product_reference: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_minor_units: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct LineItems(pub Vec<CheckoutLineItem>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkouts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub session_id: String,

    pub buyer_id: Uuid,

    #[sea_orm(column_type = "Json")]
    pub line_items: LineItems,

    pub total_minor_units: i64,
    pub currency: String,
    pub status: CheckoutStatus,

    #[sea_orm(column_type = "Json", nullable)]
    pub billing_detail: Option<Json>,
    #[sea_orm(column_type = "Json")]
    pub raw_gateway_session: Json,

    pub payment_intent_id: Option<String>,

    pub customer_name: String,
    pub customer_contact: String,
    #[sea_orm(column_type = "Text")]
    pub delivery_address: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub billing_address: Option<String>,
    pub payment_method: Option<String>,

    /// Set once an order has been materialized for this checkout
    pub order_id: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub fulfillment_error: Option<String>,

    /// Gateway-reported session creation time
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "crate::entities::order::Entity")]
    Order,
}

impl Related<crate::entities::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
