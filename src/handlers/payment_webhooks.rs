use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::orders::MaterializeOutcome;
use crate::stripe::webhook::{normalize_event, verify_signature};
use crate::{ApiResponse, AppState};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, warn};

/// POST /api/v1/payments/webhook
///
/// Entry point for signed processor events. Signature verification
/// always runs and fails closed; a bad signature means zero processing.
/// Events that cannot be repaired by redelivery (missing metadata,
/// already-consumed tokens) are acknowledged with 200 so the processor
/// stops retrying them.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted (processed, ignored, or no-op)"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ServiceError::SignatureInvalid)?;

    verify_signature(
        &body,
        signature,
        &state.config.stripe.webhook_secret,
        state.config.stripe.webhook_tolerance_secs,
    )?;

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let confirmed = match normalize_event(&event) {
        Ok(Some(confirmed)) => confirmed,
        Ok(None) => {
            let _ = state
                .event_sender
                .send(Event::PaymentEventIgnored {
                    reason: "unhandled event kind".into(),
                })
                .await;
            return Ok(Json(ApiResponse::success(json!({ "status": "ignored" }))));
        }
        Err(ServiceError::MissingMetadata(field)) => {
            // Redelivery cannot supply metadata the session never had,
            // so acknowledge instead of asking for retries.
            warn!(%field, "payment event missing metadata, acknowledging");
            let _ = state
                .event_sender
                .send(Event::PaymentEventIgnored {
                    reason: format!("missing metadata: {}", field),
                })
                .await;
            return Ok(Json(ApiResponse::success(
                json!({ "status": "ignored", "reason": format!("missing metadata: {}", field) }),
            )));
        }
        Err(e) => return Err(e),
    };

    match state.services.orders.materialize_order(&confirmed).await? {
        MaterializeOutcome::Created(order) => {
            info!(order_id = %order.id, "webhook produced order");
            Ok(Json(ApiResponse::success(
                json!({ "status": "processed", "order_id": order.id }),
            )))
        }
        MaterializeOutcome::NoOp => {
            info!(token = %confirmed.token, "webhook redelivery, token already consumed");
            Ok(Json(ApiResponse::success(json!({ "status": "noop" }))))
        }
    }
}
