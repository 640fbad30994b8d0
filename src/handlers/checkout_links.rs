use crate::auth::StaffIdentity;
use crate::errors::ServiceError;
use crate::services::checkout_links::IssuedCheckoutLink;
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// POST /api/v1/recommendations/:id/checkout-link
///
/// Mints a fresh single-use checkout link for a recommendation. Only
/// the owning practitioner or an admin/dev may call this.
#[utoipa::path(
    post,
    path = "/api/v1/recommendations/{id}/checkout-link",
    params(("id" = Uuid, Path, description = "Recommendation ID")),
    responses(
        (status = 200, description = "Checkout link issued", body = IssuedCheckoutLink),
        (status = 400, description = "Recommendation not payable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller may not act on this recommendation", body = crate::errors::ErrorResponse),
        (status = 404, description = "Recommendation not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn issue_checkout_link(
    State(state): State<AppState>,
    identity: StaffIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<IssuedCheckoutLink>>, ServiceError> {
    let issued = state.services.checkout_links.issue(id, &identity).await?;
    Ok(Json(ApiResponse::success(issued)))
}
