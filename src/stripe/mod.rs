pub mod webhook;

use crate::errors::ServiceError;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Currencies whose smallest unit is the major unit (no cent division).
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Converts a decimal amount to the processor's minor units.
/// This is the only place amounts leave `Decimal` representation.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    let factor = if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_uppercase().as_str()) {
        Decimal::ONE
    } else {
        Decimal::ONE_HUNDRED
    };
    (amount * factor)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

/// One line of a hosted checkout session.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub next_action: Option<NextAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextAction {
    pub promptpay_display_qr_code: Option<PromptPayQr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptPayQr {
    pub image_url_png: Option<String>,
}

impl PaymentIntent {
    /// The PNG QR asset, when Stripe attached one to the confirmation.
    pub fn qr_image_url(&self) -> Option<&str> {
        self.next_action
            .as_ref()
            .and_then(|na| na.promptpay_display_qr_code.as_ref())
            .and_then(|qr| qr.image_url_png.as_deref())
    }
}

/// Thin form-encoded client for the Stripe REST API. The base URL is
/// injectable so integration tests can stand in a local stub.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: String, api_base: String) -> Self {
        Self {
            http: Client::new(),
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentProviderError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentProviderError(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::PaymentProviderError(e.to_string()))
    }

    /// Creates a hosted Checkout Session (mode=payment). Metadata pairs
    /// come back verbatim on the `checkout.session.completed` event and
    /// are the only link between the session and our records.
    #[instrument(skip(self, line_items, metadata))]
    pub async fn create_checkout_session(
        &self,
        currency: &str,
        line_items: &[SessionLineItem],
        metadata: &[(String, String)],
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), success_url.into()),
            ("cancel_url".into(), cancel_url.into()),
        ];
        for (i, item) in line_items.iter().enumerate() {
            params.push((
                format!("line_items[{}][price_data][currency]", i),
                currency.to_lowercase(),
            ));
            params.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount_minor.to_string(),
            ));
            params.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            params.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        debug!(lines = line_items.len(), "creating checkout session");
        self.post_form("/v1/checkout/sessions", &params).await
    }

    /// Creates a PromptPay PaymentIntent carrying the same metadata
    /// contract as the hosted session. Not confirmed yet.
    #[instrument(skip(self, metadata))]
    pub async fn create_promptpay_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &[(String, String)],
    ) -> Result<PaymentIntent, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_lowercase()),
            ("payment_method_types[]".into(), "promptpay".into()),
            ("payment_method_data[type]".into(), "promptpay".into()),
        ];
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        self.post_form("/v1/payment_intents", &params).await
    }

    /// Confirms a PaymentIntent; for PromptPay the confirmation response
    /// carries the QR display asset under `next_action`.
    #[instrument(skip(self))]
    pub async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        let path = format!("/v1/payment_intents/{}/confirm", intent_id);
        self.post_form(&path, &[]).await
    }
}
