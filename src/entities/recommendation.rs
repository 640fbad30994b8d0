use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A practitioner's treatment recommendation, the root of the checkout
/// pipeline. Status only ever moves forward.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recommendations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub total_cost: Decimal,
    pub status: String,
    /// JSON array of notification channel names already used for this
    /// recommendation, e.g. ["email","line"]
    pub notification_channels: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recommendation_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::checkout_token::Entity")]
    CheckoutTokens,
}

impl Related<super::recommendation_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::checkout_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RecommendationStatus {
    Draft,
    PaymentPending,
    Paid,
    Completed,
}

impl RecommendationStatus {
    /// Ordinal position in the forward-only lifecycle.
    pub fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::PaymentPending => 1,
            Self::Paid => 2,
            Self::Completed => 3,
        }
    }
}
