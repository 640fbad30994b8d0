use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-currency price for a herb. Absence of a row for a currency means
/// the herb falls back to its default price and default currency.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "herb_prices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub herb_id: Uuid,
    pub currency: String,
    pub unit_price: Decimal,
    pub cost_per_unit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::herb::Entity",
        from = "Column::HerbId",
        to = "super::herb::Column::Id"
    )]
    Herb,
}

impl Related<super::herb::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Herb.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
