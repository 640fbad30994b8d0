use crate::entities::{herb, herb_price};
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A price resolution result. `resolved_currency` is the currency the
/// price is actually denominated in; on fallback it is the herb's
/// default currency, never the requested one.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPrice {
    pub unit_price: Decimal,
    pub cost_per_unit: Option<Decimal>,
    pub resolved_currency: String,
}

#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves a herb's unit price for the requested currency. An
    /// explicit per-currency row wins; otherwise the herb's default
    /// price applies in the herb's default currency. No FX conversion
    /// happens on fallback.
    #[instrument(skip(self))]
    pub async fn resolve(&self, herb_id: Uuid, currency: &str) -> Result<ResolvedPrice, ServiceError> {
        let currency = currency.to_uppercase();

        if let Some(row) = herb_price::Entity::find()
            .filter(herb_price::Column::HerbId.eq(herb_id))
            .filter(herb_price::Column::Currency.eq(currency.clone()))
            .one(self.db.as_ref())
            .await?
        {
            return Ok(ResolvedPrice {
                unit_price: row.unit_price,
                cost_per_unit: row.cost_per_unit,
                resolved_currency: row.currency,
            });
        }

        let herb = herb::Entity::find_by_id(herb_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("herb {}", herb_id)))?;

        debug!(%herb_id, requested = %currency, fallback = %herb.default_currency, "price fallback to default currency");
        Ok(ResolvedPrice {
            unit_price: herb.default_price,
            cost_per_unit: None,
            resolved_currency: herb.default_currency,
        })
    }
}
