use crate::entities::{
    checkout_token, order,
    order::{OrderStatus, PaymentMethod, PaymentStatus},
    patient, recommendation_item,
    recommendation::RecommendationStatus,
    reconciliation_task::TaskType,
};
use crate::errors::ServiceError;
use crate::events::{reconciliation, Event, EventSender};
use crate::stripe::webhook::PaymentConfirmed;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of feeding a confirmed payment through the materializer.
#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    /// A new order was created for this confirmation.
    Created(Box<order::Model>),
    /// The token was already consumed or expired; nothing happened.
    /// Redeliveries land here and must be acknowledged upstream.
    NoOp,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Turns a confirmed payment into exactly one order.
    ///
    /// The token claim is a single conditional update gated on
    /// rows_affected, inside the same transaction as the order insert
    /// and the recommendation advance. Concurrent deliveries of the
    /// same event race on that claim; exactly one wins, the rest are
    /// NoOp. The total is recomputed from the immutable item snapshots;
    /// processor metadata never contributes a number.
    #[instrument(skip(self, confirmed), fields(token = %confirmed.token, rail = %confirmed.rail))]
    pub async fn materialize_order(
        &self,
        confirmed: &PaymentConfirmed,
    ) -> Result<MaterializeOutcome, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let claim = checkout_token::Entity::update_many()
            .col_expr(checkout_token::Column::UsedAt, Expr::value(Some(now)))
            .filter(checkout_token::Column::Token.eq(confirmed.token.clone()))
            .filter(checkout_token::Column::UsedAt.is_null())
            .filter(checkout_token::Column::ExpiresAt.gt(now))
            .exec(&txn)
            .await?;
        if claim.rows_affected == 0 {
            txn.rollback().await?;
            info!("token already consumed or expired, nothing to do");
            return Ok(MaterializeOutcome::NoOp);
        }

        let token_row = checkout_token::Entity::find_by_id(confirmed.token.clone())
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::InternalError("claimed token vanished".into()))?;

        // The token row is authoritative for which recommendation is
        // being paid; mismatched metadata gets logged and overridden.
        if token_row.recommendation_id != confirmed.recommendation_id {
            warn!(
                token_rec = %token_row.recommendation_id,
                event_rec = %confirmed.recommendation_id,
                "event metadata disagrees with token, trusting the token"
            );
        }
        let recommendation_id = token_row.recommendation_id;

        let items = recommendation_item::Entity::find()
            .filter(recommendation_item::Column::RecommendationId.eq(recommendation_id))
            .all(&txn)
            .await?;
        if items.is_empty() {
            txn.rollback().await?;
            return Err(ServiceError::InvalidRecommendation(
                "paid recommendation has no items".into(),
            ));
        }

        let total: Decimal = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        let currency = items[0].currency.clone();

        // Metadata never contributes a value; the snapshot currency and
        // total win. A session built in another currency shows up here
        // so reconciliation against processor statements has a trail.
        if let Some(session_currency) = confirmed.currency.as_deref() {
            if !session_currency.eq_ignore_ascii_case(&currency) {
                warn!(
                    session_currency,
                    order_currency = %currency,
                    "session currency differs from item snapshots, recording snapshots"
                );
            }
        }

        let patient_row = patient::Entity::find_by_id(confirmed.patient_id)
            .one(&txn)
            .await?;

        let shipping_address = confirmed
            .shipping
            .address
            .clone()
            .or_else(|| patient_row.as_ref().and_then(|p| p.default_shipping_address.clone()));
        let shipping_city = confirmed
            .shipping
            .city
            .clone()
            .or_else(|| patient_row.as_ref().and_then(|p| p.default_shipping_city.clone()));
        let shipping_postal_code = confirmed.shipping.postal_code.clone().or_else(|| {
            patient_row
                .as_ref()
                .and_then(|p| p.default_shipping_postal_code.clone())
        });
        let shipping_phone = confirmed
            .shipping
            .phone
            .clone()
            .or_else(|| patient_row.as_ref().and_then(|p| p.default_shipping_phone.clone()));

        let order_id = Uuid::new_v4();
        let (session_id, intent_id) = match confirmed.rail {
            PaymentMethod::StripeCheckout => (Some(confirmed.processor_ref.clone()), None),
            PaymentMethod::Promptpay => (None, Some(confirmed.processor_ref.clone())),
        };

        let inserted = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now)),
            recommendation_id: Set(recommendation_id),
            patient_id: Set(confirmed.patient_id),
            total_amount: Set(total),
            currency: Set(currency),
            exchange_rate: Set(confirmed.exchange_rate),
            payment_method: Set(confirmed.rail.to_string()),
            payment_status: Set(PaymentStatus::Paid.to_string()),
            stripe_session_id: Set(session_id),
            stripe_payment_intent_id: Set(intent_id),
            status: Set(OrderStatus::Pending.to_string()),
            shipping_address: Set(shipping_address.clone()),
            shipping_city: Set(shipping_city.clone()),
            shipping_postal_code: Set(shipping_postal_code.clone()),
            shipping_phone: Set(shipping_phone.clone()),
            tracking_number: Set(None),
            courier: Set(None),
            paid_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        reconciliation::advance_recommendation(&txn, recommendation_id, RecommendationStatus::Paid)
            .await?;

        txn.commit().await?;
        info!(%order_id, %total, "order materialized");

        // Ancillary effects: never roll back a paid order over these.
        for item in &items {
            if let Err(e) =
                reconciliation::decrement_stock(self.db.as_ref(), item.herb_id, item.quantity).await
            {
                error!(herb_id = %item.herb_id, error = %e, "stock decrement failed, queueing repair");
                let payload = reconciliation::stock_decrement_payload(item.herb_id, item.quantity);
                if let Err(e) =
                    reconciliation::enqueue(self.db.as_ref(), order_id, TaskType::StockDecrement, payload)
                        .await
                {
                    error!(error = %e, "could not enqueue stock reconciliation task");
                }
            }
        }

        if !confirmed.shipping.is_empty() {
            let defaults = reconciliation::PatientDefaultsPayload {
                patient_id: confirmed.patient_id,
                address: shipping_address,
                city: shipping_city,
                postal_code: shipping_postal_code,
                phone: shipping_phone,
            };
            if let Err(e) =
                reconciliation::update_patient_defaults(self.db.as_ref(), &defaults).await
            {
                warn!(error = %e, "patient defaults update failed, queueing repair");
                let payload = json!(&defaults);
                if let Err(e) = reconciliation::enqueue(
                    self.db.as_ref(),
                    order_id,
                    TaskType::PatientDefaults,
                    payload,
                )
                .await
                {
                    error!(error = %e, "could not enqueue patient defaults task");
                }
            }
        }

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            error!(error = %e, "failed to emit OrderCreated");
        }

        Ok(MaterializeOutcome::Created(Box::new(inserted)))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
    }

    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let paginator = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Fulfillment status update for staff. Only legal transitions go
    /// through; delivery also advances the recommendation to completed.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        tracking_number: Option<String>,
        courier: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let existing = self.get_order(order_id).await?;
        let current = OrderStatus::from_str(&existing.status)
            .map_err(|_| ServiceError::InternalError(format!("unknown order status {}", existing.status)))?;

        if !current.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order from {} to {}",
                current, new_status
            )));
        }

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        if let Some(tracking) = tracking_number {
            active.tracking_number = Set(Some(tracking));
        }
        if let Some(courier) = courier {
            active.courier = Set(Some(courier));
        }
        let updated = active.update(self.db.as_ref()).await?;

        if new_status == OrderStatus::Delivered {
            if let Err(e) = reconciliation::advance_recommendation(
                self.db.as_ref(),
                updated.recommendation_id,
                RecommendationStatus::Completed,
            )
            .await
            {
                warn!(error = %e, "recommendation completion failed, queueing repair");
                let payload = json!({
                    "recommendation_id": updated.recommendation_id,
                    "status": RecommendationStatus::Completed.to_string(),
                });
                if let Err(e) = reconciliation::enqueue(
                    self.db.as_ref(),
                    order_id,
                    TaskType::RecommendationStatus,
                    payload,
                )
                .await
                {
                    error!(error = %e, "could not enqueue recommendation status task");
                }
            }
        }

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                from: current.to_string(),
                to: new_status.to_string(),
            })
            .await
        {
            error!(error = %e, "failed to emit OrderStatusChanged");
        }

        Ok(updated)
    }
}

fn generate_order_number(now: chrono::DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d"), &suffix[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_carry_date_and_random_suffix() {
        let now = Utc::now();
        let number = generate_order_number(now);
        assert!(number.starts_with(&format!("ORD-{}-", now.format("%Y%m%d"))));
        assert_ne!(generate_order_number(now), generate_order_number(now));
    }
}
