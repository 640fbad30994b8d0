use crate::auth::StaffIdentity;
use crate::entities::order;
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Target fulfillment status (pending, processing, shipped,
    /// delivered, cancelled)
    pub status: String,
    pub tracking_number: Option<String>,
    pub courier: Option<String>,
}

/// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number (1-based)"),
        ("limit" = Option<u64>, Query, description = "Page size")
    ),
    responses(
        (status = 200, description = "Orders page"),
        (status = 401, description = "Missing staff identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _identity: StaffIdentity,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<order::Model>>>, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(query.page, query.limit)
        .await?;
    let limit = query.limit.clamp(1, 100);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        total_pages: total.div_ceil(limit),
        items: orders,
        total,
        page: query.page,
        limit,
    })))
}

/// GET /api/v1/orders/:id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _identity: StaffIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// PUT /api/v1/orders/:id/status
///
/// Staff fulfillment updates. Illegal transitions are rejected.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated"),
        (status = 400, description = "Illegal status transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    _identity: StaffIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let status = OrderStatus::from_str(&payload.status)
        .map_err(|_| ServiceError::BadRequest(format!("unknown status {}", payload.status)))?;
    let updated = state
        .services
        .orders
        .update_order_status(id, status, payload.tracking_number, payload.courier)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}
