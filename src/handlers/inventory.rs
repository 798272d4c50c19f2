use crate::{
    auth::AuthUser,
    entities::stock_movement::MovementKind,
    errors::ServiceError,
    handlers::common::{created_response, validate_input, ApiCreated},
    services::{
        inventory::NewAdjustment,
        ledger::{MovementFilter, MovementView},
        stock::{AdjustmentOutcome, Availability, StockRef},
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Manual stock correction. `outflow` and `return` always subtract,
/// `inflow` always adds, `adjustment` applies the signed quantity as given.
#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct StockAdjustmentRequest {
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub kind: MovementKind,
    #[validate(range(
        min = -1_000_000,
        max = 1_000_000,
        message = "Quantity must be between -1000000 and 1000000"
    ))]
    pub quantity: i32,
    #[validate(length(max = 64, message = "Reference cannot exceed 64 characters"))]
    pub reference: Option<String>,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/movements",
    params(MovementFilter),
    responses(
        (status = 200, description = "Ledger entries, newest first (max 500)", body = [MovementView]),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "inventory"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    Query(filter): Query<MovementFilter>,
) -> ApiResult<Vec<MovementView>> {
    let movements = state.services.inventory.movements(&filter).await?;
    Ok(Json(ApiResponse::success(movements)))
}

#[utoipa::path(
    post,
    path = "/api/v1/inventory/adjustments",
    request_body = StockAdjustmentRequest,
    responses(
        (status = 201, description = "Adjustment applied and ledgered", body = AdjustmentOutcome),
        (status = 400, description = "Invalid request, variant required or stock would drop below reserved", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or variant not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "inventory"
)]
pub async fn create_adjustment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<StockAdjustmentRequest>,
) -> ApiCreated<AdjustmentOutcome> {
    validate_input(&payload)?;
    let target = StockRef::from_parts(payload.product_id, payload.variant_id)?;

    let outcome = state
        .services
        .inventory
        .adjust(
            &user,
            NewAdjustment {
                target,
                kind: payload.kind,
                quantity: payload.quantity,
                reference: payload.reference,
                description: payload.description,
            },
        )
        .await?;
    Ok(created_response(outcome))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/products/{id}",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Stock counters of the product", body = Availability),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "inventory"
)]
pub async fn product_availability(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Availability>>, ServiceError> {
    let availability = state
        .services
        .inventory
        .availability(StockRef::Product(id))
        .await?;
    Ok(Json(ApiResponse::success(availability)))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/variants/{id}",
    params(("id" = i32, Path, description = "Variant id")),
    responses(
        (status = 200, description = "Stock counters of the variant", body = Availability),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "inventory"
)]
pub async fn variant_availability(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Availability>>, ServiceError> {
    let availability = state
        .services
        .inventory
        .availability(StockRef::Variant(id))
        .await?;
    Ok(Json(ApiResponse::success(availability)))
}
