use crate::auth::StaffIdentity;
use crate::config::AppConfig;
use crate::entities::{
    checkout_token, recommendation, recommendation::RecommendationStatus, recommendation_item,
};
use crate::errors::ServiceError;
use crate::events::{reconciliation, Event, EventSender};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Result of minting a checkout link.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedCheckoutLink {
    pub checkout_url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckoutLinkService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl CheckoutLinkService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, event_sender: EventSender) -> Self {
        Self {
            db,
            config,
            event_sender,
        }
    }

    /// Mints a fresh single-use checkout token for a recommendation and
    /// returns the patient-facing URL. Repeat calls mint additional
    /// valid tokens (resend with a fresh link); earlier tokens stay
    /// live until they expire or get consumed.
    #[instrument(skip(self, issuer), fields(staff_id = %issuer.staff_id))]
    pub async fn issue(
        &self,
        recommendation_id: Uuid,
        issuer: &StaffIdentity,
    ) -> Result<IssuedCheckoutLink, ServiceError> {
        let rec = recommendation::Entity::find_by_id(recommendation_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("recommendation {}", recommendation_id))
            })?;

        if !issuer.can_act_on(rec.practitioner_id) {
            return Err(ServiceError::Forbidden(
                "only the owning practitioner or an admin may issue checkout links".into(),
            ));
        }

        if rec.total_cost <= Decimal::ZERO {
            return Err(ServiceError::InvalidRecommendation(
                "recommendation has no positive total".into(),
            ));
        }

        let item_count = recommendation_item::Entity::find()
            .filter(recommendation_item::Column::RecommendationId.eq(recommendation_id))
            .count(self.db.as_ref())
            .await?;
        if item_count == 0 {
            return Err(ServiceError::InvalidRecommendation(
                "recommendation has no items".into(),
            ));
        }

        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + self.config.checkout_token_ttl();

        checkout_token::ActiveModel {
            token: Set(token.clone()),
            recommendation_id: Set(recommendation_id),
            created_at: Set(now),
            expires_at: Set(expires_at),
            used_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;

        // Forward-only: draft moves to payment_pending, later statuses
        // are left alone.
        reconciliation::advance_recommendation(
            self.db.as_ref(),
            recommendation_id,
            RecommendationStatus::PaymentPending,
        )
        .await?;

        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutLinkIssued {
                recommendation_id,
                expires_at,
            })
            .await
        {
            error!(error = %e, "failed to emit CheckoutLinkIssued");
        }

        info!(%recommendation_id, %expires_at, "checkout link issued");
        Ok(IssuedCheckoutLink {
            checkout_url: self.config.checkout_url(&token),
            token,
            expires_at,
        })
    }
}

/// 32 random bytes, hex-encoded: unguessable and URL-safe.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
