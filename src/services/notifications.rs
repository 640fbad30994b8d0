use crate::config::{EmailConfig, LineConfig};
use crate::entities::{order, order::OrderStatus, patient, recommendation};
use crate::errors::ServiceError;
use reqwest::Client;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Per-channel delivery outcome. Channels are independent: one failing
/// never blocks the other.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct NotificationOutcome {
    pub email_sent: bool,
    pub line_sent: bool,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    http: Client,
    email: EmailConfig,
    line: LineConfig,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>, email: EmailConfig, line: LineConfig) -> Self {
        Self {
            db,
            http: Client::new(),
            email,
            line,
        }
    }

    /// Sends the patient a status message for an order over every
    /// channel they have contact details for. Failures are recorded in
    /// the outcome and logged; there is no retry here.
    #[instrument(skip(self))]
    pub async fn notify_order_status(&self, order_id: Uuid) -> Result<NotificationOutcome, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;

        let patient = patient::Entity::find_by_id(order.patient_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("patient {}", order.patient_id)))?;

        let status = OrderStatus::from_str(&order.status).unwrap_or(OrderStatus::Pending);
        let (subject, body) = render_message(&order, &patient.full_name, status);

        let mut email_sent = false;
        if let Some(address) = patient.email.as_deref() {
            match self.send_email(address, &subject, &body).await {
                Ok(()) => email_sent = true,
                Err(e) => warn!(%order_id, error = %e, "email notification failed"),
            }
        }

        let mut line_sent = false;
        if let Some(line_user) = patient.line_user_id.as_deref() {
            match self.send_line_push(line_user, &body).await {
                Ok(()) => line_sent = true,
                Err(e) => warn!(%order_id, error = %e, "line notification failed"),
            }
        }

        if email_sent || line_sent {
            if let Err(e) = self
                .record_channels(order.recommendation_id, email_sent, line_sent)
                .await
            {
                warn!(error = %e, "could not record notification channels");
            }
        }

        info!(%order_id, email_sent, line_sent, "notification dispatch finished");
        Ok(NotificationOutcome {
            email_sent,
            line_sent,
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        let url = format!("{}/emails", self.email.api_base.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.email.api_key)
            .json(&json!({
                "from": self.email.from_email,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "email provider returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn send_line_push(&self, line_user_id: &str, text: &str) -> Result<(), ServiceError> {
        let url = format!(
            "{}/v2/bot/message/push",
            self.line.api_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.line.channel_access_token)
            .json(&json!({
                "to": line_user_id,
                "messages": [{ "type": "text", "text": text }],
            }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "line push returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    /// Merges the channels used into the recommendation's record.
    async fn record_channels(
        &self,
        recommendation_id: Uuid,
        email: bool,
        line: bool,
    ) -> Result<(), ServiceError> {
        let Some(rec) = recommendation::Entity::find_by_id(recommendation_id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(());
        };

        let mut channels: BTreeSet<String> = rec
            .notification_channels
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
            .into_iter()
            .collect();
        if email {
            channels.insert("email".to_string());
        }
        if line {
            channels.insert("line".to_string());
        }

        let encoded = serde_json::to_string(&channels.into_iter().collect::<Vec<_>>())?;
        let mut active: recommendation::ActiveModel = rec.into();
        active.notification_channels = Set(Some(encoded));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}

fn render_message(order: &order::Model, patient_name: &str, status: OrderStatus) -> (String, String) {
    let subject = match status {
        OrderStatus::Pending => format!("Order {} received", order.order_number),
        OrderStatus::Processing => format!("Order {} is being prepared", order.order_number),
        OrderStatus::Shipped => format!("Order {} has shipped", order.order_number),
        OrderStatus::Delivered => format!("Order {} was delivered", order.order_number),
        OrderStatus::Cancelled => format!("Order {} was cancelled", order.order_number),
    };

    let mut body = format!(
        "Hello {},\n\nYour order {} ({} {}) is now {}.",
        patient_name, order.order_number, order.total_amount, order.currency, status
    );
    if status == OrderStatus::Shipped {
        if let Some(tracking) = &order.tracking_number {
            body.push_str(&format!("\nTracking number: {}", tracking));
            if let Some(courier) = &order.courier {
                body.push_str(&format!(" ({})", courier));
            }
        }
    }
    body.push_str("\n\nThank you.");

    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_order(status: OrderStatus, tracking: Option<&str>) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-20250609-ABCD1234".into(),
            recommendation_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            total_amount: dec!(350),
            currency: "THB".into(),
            exchange_rate: None,
            payment_method: "promptpay".into(),
            payment_status: "paid".into(),
            stripe_session_id: None,
            stripe_payment_intent_id: None,
            status: status.to_string(),
            shipping_address: None,
            shipping_city: None,
            shipping_postal_code: None,
            shipping_phone: None,
            tracking_number: tracking.map(str::to_string),
            courier: tracking.map(|_| "Kerry".to_string()),
            paid_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn shipped_message_includes_tracking() {
        let order = sample_order(OrderStatus::Shipped, Some("TH123456"));
        let (subject, body) = render_message(&order, "Anong", OrderStatus::Shipped);
        assert!(subject.contains("has shipped"));
        assert!(body.contains("TH123456"));
        assert!(body.contains("Kerry"));
    }

    #[test]
    fn pending_message_omits_tracking() {
        let order = sample_order(OrderStatus::Pending, None);
        let (_, body) = render_message(&order, "Anong", OrderStatus::Pending);
        assert!(!body.contains("Tracking"));
    }
}
