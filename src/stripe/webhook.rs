use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Shipping details forwarded through session metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingDetails {
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
}

impl ShippingDetails {
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.city.is_none()
            && self.postal_code.is_none()
            && self.phone.is_none()
    }
}

/// The normalized form both processor event shapes collapse into.
/// Metadata here is a routing key only; amounts are always recomputed
/// server-side by the materializer.
#[derive(Debug, Clone)]
pub struct PaymentConfirmed {
    pub token: String,
    pub recommendation_id: Uuid,
    pub patient_id: Uuid,
    pub shipping: ShippingDetails,
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub rail: PaymentMethod,
    pub processor_ref: String,
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...` scheme) against
/// the raw request body. The v1 signature is HMAC-SHA256 over
/// `"{timestamp}.{payload}"`; comparison is constant-time via the MAC
/// verify primitive.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            (Some("v1"), Some(value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ServiceError::SignatureInvalid)?;
    if signatures.is_empty() {
        return Err(ServiceError::SignatureInvalid);
    }

    let age = (Utc::now().timestamp() - timestamp).unsigned_abs();
    if age > tolerance_secs {
        return Err(ServiceError::SignatureInvalid);
    }

    for candidate in signatures {
        let Ok(candidate_bytes) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| ServiceError::SignatureInvalid)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&candidate_bytes).is_ok() {
            return Ok(());
        }
    }

    Err(ServiceError::SignatureInvalid)
}

fn metadata_str(metadata: &Value, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn required_uuid(metadata: &Value, key: &str) -> Result<Uuid, ServiceError> {
    let raw = metadata_str(metadata, key).ok_or_else(|| ServiceError::MissingMetadata(key.into()))?;
    Uuid::parse_str(&raw).map_err(|_| ServiceError::MissingMetadata(key.into()))
}

fn shipping_from_metadata(metadata: &Value) -> ShippingDetails {
    ShippingDetails {
        address: metadata_str(metadata, "shipping_address"),
        city: metadata_str(metadata, "shipping_city"),
        postal_code: metadata_str(metadata, "shipping_postal_code"),
        phone: metadata_str(metadata, "shipping_phone"),
    }
}

/// Collapses a verified processor event into the internal confirmation
/// value. Returns `Ok(None)` for event kinds this service does not
/// handle, and for payment intents that do not belong to this pipeline
/// (no `recommendation_id` metadata).
pub fn normalize_event(event: &Value) -> Result<Option<PaymentConfirmed>, ServiceError> {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("event missing type".into()))?;

    let object = event
        .pointer("/data/object")
        .ok_or_else(|| ServiceError::BadRequest("event missing data.object".into()))?;
    let empty = Value::Object(serde_json::Map::new());
    let metadata = object.get("metadata").unwrap_or(&empty);

    match event_type {
        "checkout.session.completed" => {
            let token = metadata_str(metadata, "token")
                .ok_or_else(|| ServiceError::MissingMetadata("token".into()))?;
            let recommendation_id = required_uuid(metadata, "recommendation_id")?;
            let patient_id = required_uuid(metadata, "patient_id")?;
            let processor_ref = object
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            Ok(Some(PaymentConfirmed {
                token,
                recommendation_id,
                patient_id,
                shipping: shipping_from_metadata(metadata),
                currency: metadata_str(metadata, "currency"),
                exchange_rate: metadata_str(metadata, "exchange_rate")
                    .and_then(|raw| Decimal::from_str(&raw).ok()),
                rail: PaymentMethod::StripeCheckout,
                processor_ref,
            }))
        }
        "payment_intent.succeeded" => {
            // PromptPay intents carry our metadata; any other intent that
            // happens to share the Stripe account is not ours to process.
            if metadata_str(metadata, "recommendation_id").is_none() {
                warn!("payment_intent.succeeded without recommendation_id metadata, skipping");
                return Ok(None);
            }
            let token = metadata_str(metadata, "token")
                .ok_or_else(|| ServiceError::MissingMetadata("token".into()))?;
            let recommendation_id = required_uuid(metadata, "recommendation_id")?;
            let patient_id = required_uuid(metadata, "patient_id")?;
            let processor_ref = object
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            Ok(Some(PaymentConfirmed {
                token,
                recommendation_id,
                patient_id,
                shipping: shipping_from_metadata(metadata),
                currency: metadata_str(metadata, "currency"),
                exchange_rate: metadata_str(metadata, "exchange_rate")
                    .and_then(|raw| Decimal::from_str(&raw).ok()),
                rail: PaymentMethod::Promptpay,
                processor_ref,
            }))
        }
        _ => Ok(None),
    }
}
