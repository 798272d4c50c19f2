use crate::errors::ServiceError;
use crate::services::stock::LineRequest;
use crate::{ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

/// Result type for endpoints answering `201 Created`
pub type ApiCreated<T> = Result<(StatusCode, Json<ApiResponse<T>>), ServiceError>;

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Pagination parameters for list operations
#[derive(Debug, Clone, Copy, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: u64,
    /// Page size (max 100)
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    DEFAULT_PER_PAGE
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    pub fn from_query(page: Option<u64>, per_page: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or_else(default_page),
            per_page: per_page.unwrap_or_else(default_per_page),
        }
        .normalized()
    }

    /// Clamps out-of-range values instead of rejecting them
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn into_response<T>(self, items: Vec<T>, total: u64) -> PaginatedResponse<T> {
        let total_pages = if total == 0 {
            0
        } else {
            (total + self.per_page - 1) / self.per_page
        };
        PaginatedResponse {
            items,
            total,
            page: self.page,
            limit: self.per_page,
            total_pages,
        }
    }
}

/// One requested item. Name a `variant_id` for products sold by size; a
/// `product_id` sent alongside it must be the variant's product.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct LineItemRequest {
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

impl LineItemRequest {
    fn to_line_request(&self, position: usize) -> Result<LineRequest, ServiceError> {
        validate_input(self)?;
        if self.product_id.is_none() && self.variant_id.is_none() {
            return Err(ServiceError::ValidationError(format!(
                "Line {} must name a product_id or a variant_id",
                position + 1
            )));
        }
        Ok(LineRequest {
            product_id: self.product_id,
            variant_id: self.variant_id,
            quantity: self.quantity,
        })
    }
}

/// Validates every line and converts them for the service layer
pub fn line_requests(lines: &[LineItemRequest]) -> Result<Vec<LineRequest>, ServiceError> {
    lines
        .iter()
        .enumerate()
        .map(|(position, line)| line.to_line_request(position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pagination_is_clamped_and_counts_pages() {
        let params = PaginationParams { page: 0, per_page: 1_000 }.normalized();
        assert_eq!((params.page, params.per_page), (1, MAX_PER_PAGE));

        let params = PaginationParams::from_query(None, None);
        assert_eq!((params.page, params.per_page), (1, DEFAULT_PER_PAGE));

        let page = PaginationParams { page: 2, per_page: 20 }.into_response(vec![1, 2], 41);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.limit, 20);
    }

    #[test]
    fn lines_need_a_target_and_a_positive_quantity() {
        let line = |product_id, variant_id, quantity| LineItemRequest { product_id, variant_id, quantity };

        assert_eq!(line_requests(&[line(Some(1), None, 2)]).unwrap().len(), 1);
        assert_matches!(
            line_requests(&[line(None, None, 2)]),
            Err(ServiceError::ValidationError(msg)) if msg.contains("Line 1")
        );
        assert_matches!(
            line_requests(&[line(Some(1), None, 1), line(None, Some(3), 0)]),
            Err(ServiceError::ValidationError(_))
        );
    }
}
