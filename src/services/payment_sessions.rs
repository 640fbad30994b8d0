use crate::config::AppConfig;
use crate::entities::{checkout_token, exchange_rate, herb, recommendation, recommendation_item};
use crate::errors::ServiceError;
use crate::services::pricing::PricingService;
use crate::stripe::webhook::ShippingDetails;
use crate::stripe::{to_minor_units, SessionLineItem, StripeClient};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One priced line of the patient-facing checkout page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SummaryLine {
    pub herb_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub dosage_note: Option<String>,
}

/// What the checkout page renders before the patient picks a rail.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutSummary {
    pub recommendation_id: Uuid,
    pub patient_id: Uuid,
    pub diagnosis: Option<String>,
    pub items: Vec<SummaryLine>,
    pub total: Decimal,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HostedSession {
    pub redirect_url: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PromptPaySession {
    pub qr_image_url: String,
    pub payment_intent_id: String,
}

/// Builds payment sessions against the processor. Persists nothing
/// locally; the webhook is the only authoritative success signal.
#[derive(Clone)]
pub struct PaymentSessionService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    stripe: StripeClient,
    pricing: PricingService,
}

struct PricedItems {
    lines: Vec<(recommendation_item::Model, herb::Model, Decimal)>,
    currency: String,
    total: Decimal,
}

impl PaymentSessionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        stripe: StripeClient,
        pricing: PricingService,
    ) -> Self {
        Self {
            db,
            config,
            stripe,
            pricing,
        }
    }

    /// Loads the token and its recommendation, rejecting consumed and
    /// expired links with the same terminal error.
    async fn validate_token(
        &self,
        token: &str,
    ) -> Result<(checkout_token::Model, recommendation::Model), ServiceError> {
        let row = checkout_token::Entity::find_by_id(token.to_string())
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        if !row.is_usable(Utc::now()) {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let rec = recommendation::Entity::find_by_id(row.recommendation_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        Ok((row, rec))
    }

    async fn load_items(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Vec<(recommendation_item::Model, herb::Model)>, ServiceError> {
        let items = recommendation_item::Entity::find()
            .filter(recommendation_item::Column::RecommendationId.eq(recommendation_id))
            .all(self.db.as_ref())
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidRecommendation(
                "recommendation has no items".into(),
            ));
        }

        let herb_ids: Vec<Uuid> = items.iter().map(|i| i.herb_id).collect();
        let herbs: HashMap<Uuid, herb::Model> = herb::Entity::find()
            .filter(herb::Column::Id.is_in(herb_ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|h| (h.id, h))
            .collect();

        items
            .into_iter()
            .map(|item| {
                let herb = herbs
                    .get(&item.herb_id)
                    .cloned()
                    .ok_or_else(|| ServiceError::NotFound(format!("herb {}", item.herb_id)))?;
                Ok((item, herb))
            })
            .collect()
    }

    /// Prices the line items for a session. With no requested currency
    /// the immutable snapshots on the items apply; an item with no
    /// snapshot currency is denominated in the configured default.
    /// With a requested
    /// currency, every item must have an explicit price row in it;
    /// if any item falls back, the whole session reverts to snapshot
    /// pricing so the session stays single-currency.
    async fn price_items(
        &self,
        recommendation_id: Uuid,
        requested_currency: Option<&str>,
    ) -> Result<PricedItems, ServiceError> {
        let pairs = self.load_items(recommendation_id).await?;
        let snapshot_currency = match pairs[0].0.currency.trim() {
            "" => self.config.default_currency.clone(),
            snapshot => snapshot.to_string(),
        };

        if let Some(requested) = requested_currency {
            let requested = requested.to_uppercase();
            if requested != snapshot_currency {
                let mut resolved = Vec::with_capacity(pairs.len());
                let mut complete = true;
                for (item, herb) in &pairs {
                    let price = self.pricing.resolve(item.herb_id, &requested).await?;
                    if price.resolved_currency != requested {
                        complete = false;
                        break;
                    }
                    resolved.push((item.clone(), herb.clone(), price.unit_price));
                }
                if complete {
                    let total = resolved
                        .iter()
                        .map(|(item, _, price)| *price * Decimal::from(item.quantity))
                        .sum();
                    return Ok(PricedItems {
                        lines: resolved,
                        currency: requested,
                        total,
                    });
                }
                warn!(%recommendation_id, requested = %requested, "incomplete price list, reverting to snapshot pricing");
            }
        }

        let total = pairs
            .iter()
            .map(|(item, _)| item.unit_price * Decimal::from(item.quantity))
            .sum();
        let lines = pairs
            .into_iter()
            .map(|(item, herb)| {
                let price = item.unit_price;
                (item, herb, price)
            })
            .collect();
        Ok(PricedItems {
            lines,
            currency: snapshot_currency,
            total,
        })
    }

    async fn latest_exchange_rate(&self, currency: &str) -> Result<Option<Decimal>, ServiceError> {
        Ok(exchange_rate::Entity::find()
            .filter(exchange_rate::Column::Currency.eq(currency.to_uppercase()))
            .order_by_desc(exchange_rate::Column::RecordedAt)
            .one(self.db.as_ref())
            .await?
            .map(|row| row.rate))
    }

    fn session_metadata(
        &self,
        token: &str,
        rec: &recommendation::Model,
        shipping: &ShippingDetails,
        currency: &str,
        rate: Option<Decimal>,
    ) -> Vec<(String, String)> {
        let mut metadata = vec![
            ("token".to_string(), token.to_string()),
            ("recommendation_id".to_string(), rec.id.to_string()),
            ("patient_id".to_string(), rec.patient_id.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        if let Some(address) = &shipping.address {
            metadata.push(("shipping_address".to_string(), address.clone()));
        }
        if let Some(city) = &shipping.city {
            metadata.push(("shipping_city".to_string(), city.clone()));
        }
        if let Some(postal_code) = &shipping.postal_code {
            metadata.push(("shipping_postal_code".to_string(), postal_code.clone()));
        }
        if let Some(phone) = &shipping.phone {
            metadata.push(("shipping_phone".to_string(), phone.clone()));
        }
        if let Some(rate) = rate {
            metadata.push(("exchange_rate".to_string(), rate.to_string()));
        }
        metadata
    }

    /// The line-item summary the checkout page renders.
    #[instrument(skip(self))]
    pub async fn checkout_summary(&self, token: &str) -> Result<CheckoutSummary, ServiceError> {
        let (token_row, rec) = self.validate_token(token).await?;
        let priced = self.price_items(rec.id, None).await?;

        let items = priced
            .lines
            .iter()
            .map(|(item, herb, price)| SummaryLine {
                herb_id: item.herb_id,
                name: herb.name.clone(),
                quantity: item.quantity,
                unit_price: *price,
                line_total: *price * Decimal::from(item.quantity),
                dosage_note: item.dosage_note.clone(),
            })
            .collect();

        Ok(CheckoutSummary {
            recommendation_id: rec.id,
            patient_id: rec.patient_id,
            diagnosis: rec.diagnosis,
            items,
            total: priced.total,
            currency: priced.currency,
            expires_at: token_row.expires_at,
        })
    }

    /// Creates a Stripe hosted Checkout Session for the card rail and
    /// hands back the redirect URL.
    #[instrument(skip(self, shipping))]
    pub async fn build_hosted_session(
        &self,
        token: &str,
        shipping: &ShippingDetails,
        currency: Option<&str>,
    ) -> Result<HostedSession, ServiceError> {
        let (_, rec) = self.validate_token(token).await?;
        let priced = self.price_items(rec.id, currency).await?;
        let rate = self.latest_exchange_rate(&priced.currency).await?;

        let line_items: Vec<SessionLineItem> = priced
            .lines
            .iter()
            .map(|(item, herb, price)| {
                Ok(SessionLineItem {
                    name: herb.name.clone(),
                    unit_amount_minor: to_minor_units(*price, &priced.currency)?,
                    quantity: i64::from(item.quantity),
                })
            })
            .collect::<Result<_, ServiceError>>()?;

        let metadata = self.session_metadata(token, &rec, shipping, &priced.currency, rate);
        let site = self.config.site_url.trim_end_matches('/');
        let success_url = format!("{}/payment/success", site);
        let cancel_url = format!("{}/payment/cancel", site);

        let session = self
            .stripe
            .create_checkout_session(&priced.currency, &line_items, &metadata, &success_url, &cancel_url)
            .await?;

        let redirect_url = session.url.ok_or_else(|| {
            ServiceError::PaymentProviderError("checkout session has no redirect url".into())
        })?;

        info!(recommendation_id = %rec.id, session_id = %session.id, "hosted checkout session created");
        Ok(HostedSession {
            redirect_url,
            session_id: session.id,
        })
    }

    /// Creates and confirms a PromptPay PaymentIntent, returning the QR
    /// image to display. If the first confirmation comes back without a
    /// QR asset the same intent is confirmed once more; a second miss
    /// fails the request without any local side effects.
    #[instrument(skip(self, shipping))]
    pub async fn build_promptpay_session(
        &self,
        token: &str,
        shipping: &ShippingDetails,
    ) -> Result<PromptPaySession, ServiceError> {
        let (_, rec) = self.validate_token(token).await?;
        let priced = self.price_items(rec.id, None).await?;
        let rate = self.latest_exchange_rate(&priced.currency).await?;

        let amount_minor = to_minor_units(priced.total, &priced.currency)?;
        let metadata = self.session_metadata(token, &rec, shipping, &priced.currency, rate);

        let intent = self
            .stripe
            .create_promptpay_intent(amount_minor, &priced.currency, &metadata)
            .await?;

        let confirmed = self.stripe.confirm_payment_intent(&intent.id).await?;
        if let Some(url) = confirmed.qr_image_url() {
            info!(recommendation_id = %rec.id, intent_id = %intent.id, "promptpay qr issued");
            return Ok(PromptPaySession {
                qr_image_url: url.to_string(),
                payment_intent_id: intent.id,
            });
        }

        // One retry against the same intent; never a second intent.
        warn!(intent_id = %intent.id, "confirmation returned no QR, retrying once");
        let retried = self.stripe.confirm_payment_intent(&intent.id).await?;
        match retried.qr_image_url() {
            Some(url) => {
                info!(recommendation_id = %rec.id, intent_id = %intent.id, "promptpay qr issued on retry");
                Ok(PromptPaySession {
                    qr_image_url: url.to_string(),
                    payment_intent_id: intent.id,
                })
            }
            None => Err(ServiceError::QrGenerationFailed(format!(
                "intent {} produced no QR after retry",
                intent.id
            ))),
        }
    }
}
