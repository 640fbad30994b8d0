use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One herb line of a recommendation. Rows are immutable once written;
/// `unit_price` is the price snapshot taken at recommendation time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recommendation_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub herb_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub currency: String,
    pub dosage_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recommendation::Entity",
        from = "Column::RecommendationId",
        to = "super::recommendation::Column::Id"
    )]
    Recommendation,
    #[sea_orm(
        belongs_to = "super::herb::Entity",
        from = "Column::HerbId",
        to = "super::herb::Column::Id"
    )]
    Herb,
}

impl Related<super::recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recommendation.def()
    }
}

impl Related<super::herb::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Herb.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
