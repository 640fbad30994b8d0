use crate::errors::ServiceError;
use crate::services::payment_sessions::{CheckoutSummary, HostedSession, PromptPaySession};
use crate::stripe::webhook::ShippingDetails;
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Shipping details the patient enters on the checkout page.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ShippingRequest {
    #[validate(length(max = 500))]
    pub shipping_address: Option<String>,
    #[validate(length(max = 120))]
    pub shipping_city: Option<String>,
    #[validate(length(max = 20))]
    pub shipping_postal_code: Option<String>,
    #[validate(length(max = 32))]
    pub shipping_phone: Option<String>,
}

impl ShippingRequest {
    fn into_details(self) -> ShippingDetails {
        ShippingDetails {
            address: self.shipping_address,
            city: self.shipping_city,
            postal_code: self.shipping_postal_code,
            phone: self.shipping_phone,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct HostedSessionRequest {
    #[serde(flatten)]
    #[validate]
    pub shipping: ShippingRequest,
    /// Optional display currency; falls back to the recommendation's
    /// snapshot currency when omitted or not fully priced
    #[validate(length(min = 3, max = 3))]
    pub currency: Option<String>,
}

/// GET /api/v1/checkout/:token
///
/// The line-item summary the patient sees before choosing how to pay.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/{token}",
    params(("token" = String, Path, description = "Checkout token")),
    responses(
        (status = 200, description = "Checkout summary", body = CheckoutSummary),
        (status = 410, description = "Link consumed or expired", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_summary(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<CheckoutSummary>>, ServiceError> {
    let summary = state.services.payment_sessions.checkout_summary(&token).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// POST /api/v1/checkout/:token/session
///
/// Card rail: creates a hosted checkout session and returns the
/// redirect URL.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{token}/session",
    params(("token" = String, Path, description = "Checkout token")),
    request_body = HostedSessionRequest,
    responses(
        (status = 200, description = "Session created", body = HostedSession),
        (status = 410, description = "Link consumed or expired", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_hosted_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<HostedSessionRequest>,
) -> Result<Json<ApiResponse<HostedSession>>, ServiceError> {
    payload.validate()?;
    let currency = payload.currency.clone();
    let shipping = payload.shipping.into_details();
    let session = state
        .services
        .payment_sessions
        .build_hosted_session(&token, &shipping, currency.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

/// POST /api/v1/checkout/:token/promptpay
///
/// Push-payment rail: creates and confirms a PromptPay intent and
/// returns the QR image URL to display.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{token}/promptpay",
    params(("token" = String, Path, description = "Checkout token")),
    request_body = ShippingRequest,
    responses(
        (status = 200, description = "QR code ready", body = PromptPaySession),
        (status = 410, description = "Link consumed or expired", body = crate::errors::ErrorResponse),
        (status = 502, description = "QR code could not be obtained", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_promptpay_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ShippingRequest>,
) -> Result<Json<ApiResponse<PromptPaySession>>, ServiceError> {
    payload.validate()?;
    let shipping = payload.into_details();
    let session = state
        .services
        .payment_sessions
        .build_promptpay_session(&token, &shipping)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}
