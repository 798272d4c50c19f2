use crate::{
    auth::AuthUser,
    entities::{reservation::ReservationStatus, sale::PaymentMethod},
    errors::ServiceError,
    handlers::common::{created_response, line_requests, validate_input, ApiCreated, LineItemRequest, PaginationParams},
    services::{
        reservations::{
            NewReservation, ReservationDetail, ReservationQuery, ReservationReceipt,
            ReservationSummary, ReviewEligibility,
        },
        sales::SaleReceipt,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateReservationRequest {
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<LineItemRequest>,
    #[validate(length(max = 500, message = "Note cannot exceed 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct ConvertReservationRequest {
    /// Defaults to cash
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(max = 500, message = "Note cannot exceed 500 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReservationListQuery {
    pub status: Option<ReservationStatus>,
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub per_page: Option<u64>,
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation placed and stock held", body = ReservationReceipt,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid lines, disabled item, variant required or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or variant not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateReservationRequest>,
) -> ApiCreated<ReservationReceipt> {
    validate_input(&payload)?;
    let lines = line_requests(&payload.lines)?;

    let receipt = state
        .services
        .reservations
        .create(&user, NewReservation { lines, note: payload.note })
        .await?;
    Ok(created_response(receipt))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    params(ReservationListQuery),
    responses(
        (status = 200, description = "Reservations visible to the caller, newest first"),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn list_reservations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ReservationListQuery>,
) -> ApiResult<PaginatedResponse<ReservationSummary>> {
    let page = PaginationParams::from_query(query.page, query.per_page);
    let (items, total) = state
        .services
        .reservations
        .list(
            &user,
            ReservationQuery {
                status: query.status,
                page: page.page,
                per_page: page.per_page,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(page.into_response(items, total))))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    params(("id" = i32, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation with its lines", body = ReservationDetail),
        (status = 403, description = "Reservation belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> ApiResult<ReservationDetail> {
    let detail = state.services.reservations.get(id, &user).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/cancel",
    params(("id" = i32, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation canceled and stock released"),
        (status = 400, description = "Reservation is not active", body = crate::errors::ErrorResponse),
        (status = 403, description = "Reservation belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> ApiResult<serde_json::Value> {
    state.services.reservations.cancel(id, &user).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "reservation_id": id,
        "status": ReservationStatus::Canceled,
    }))))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/convert",
    params(("id" = i32, Path, description = "Reservation id")),
    request_body = ConvertReservationRequest,
    responses(
        (status = 201, description = "Sale registered from the reservation", body = SaleReceipt),
        (status = 400, description = "Reservation is not active", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn convert_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<ConvertReservationRequest>,
) -> ApiCreated<SaleReceipt> {
    validate_input(&payload)?;
    let receipt = state
        .services
        .reservations
        .convert_to_sale(id, &user, payload.payment_method, payload.note)
        .await?;
    Ok(created_response(receipt))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}/review-eligibility",
    params(("id" = i32, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Caller may review the purchased items", body = ReviewEligibility),
        (status = 400, description = "Reservation is not completed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller does not own the reservation", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reservations"
)]
pub async fn review_eligibility(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<ReviewEligibility>>, ServiceError> {
    let eligibility = state.services.reservations.authorize_review(id, &user).await?;
    Ok(Json(ApiResponse::success(eligibility)))
}
