use crate::{
    auth::AuthUser,
    entities::sale::{PaymentMethod, SaleOrigin, SaleStatus},
    handlers::common::{created_response, line_requests, validate_input, ApiCreated, LineItemRequest, PaginationParams},
    services::sales::{NewDirectSale, SaleDetail, SaleQuery, SaleReceipt, SaleSummary},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateSaleRequest {
    /// Registered customer buying at the counter; omit for anonymous buyers
    pub buyer_id: Option<i32>,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<LineItemRequest>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(max = 500, message = "Note cannot exceed 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SaleListQuery {
    pub origin: Option<SaleOrigin>,
    pub status: Option<SaleStatus>,
    /// Inclusive lower bound (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound (RFC 3339)
    pub to: Option<DateTime<Utc>>,
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub per_page: Option<u64>,
}

#[utoipa::path(
    post,
    path = "/api/v1/sales",
    request_body = CreateSaleRequest,
    responses(
        (status = 201, description = "Direct sale registered", body = SaleReceipt),
        (status = 400, description = "Invalid lines or insufficient unreserved stock", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product, variant or buyer not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sales"
)]
pub async fn create_sale(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateSaleRequest>,
) -> ApiCreated<SaleReceipt> {
    validate_input(&payload)?;
    let lines = line_requests(&payload.lines)?;

    let receipt = state
        .services
        .sales
        .create_direct(
            &user,
            NewDirectSale {
                buyer_id: payload.buyer_id,
                lines,
                payment_method: payload.payment_method,
                note: payload.note,
            },
        )
        .await?;
    Ok(created_response(receipt))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales",
    params(SaleListQuery),
    responses(
        (status = 200, description = "Sales, newest first"),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sales"
)]
pub async fn list_sales(
    State(state): State<AppState>,
    Query(query): Query<SaleListQuery>,
) -> ApiResult<PaginatedResponse<SaleSummary>> {
    let page = PaginationParams::from_query(query.page, query.per_page);
    let (items, total) = state
        .services
        .sales
        .list(SaleQuery {
            origin: query.origin,
            status: query.status,
            from: query.from,
            to: query.to,
            page: page.page,
            per_page: page.per_page,
        })
        .await?;

    Ok(Json(ApiResponse::success(page.into_response(items, total))))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales/{id}",
    params(("id" = i32, Path, description = "Sale id")),
    responses(
        (status = 200, description = "Sale with its lines", body = SaleDetail),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sales"
)]
pub async fn get_sale(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<SaleDetail> {
    let detail = state.services.sales.get(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}
