use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// Registers the session bearer token scheme referenced by every endpoint.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Session token issued at login"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "OrtoMediq API",
        version = "1.0.0",
        description = r#"
# OrtoMediq stock reservations and sales

Stock for orthopedic and medical supplies is tracked per product, or per
variant (size) for products sold by size.

- **Reservations** ("apartados") hold units for a customer for a limited time
  (48 hours by default). Overdue reservations expire automatically and give
  their units back.
- **Sales** either convert a reservation or sell unreserved stock over the
  counter.
- **Inventory**: every change to on-hand stock is written to an append-only
  movement ledger.

Available stock is always `on_hand - reserved`.

## Authentication

Send the session token in the Authorization header:

```
Authorization: Bearer <session-token>
```

Conversion, direct sales, sales listing, the ledger and adjustments are
restricted to staff.
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "reservations", description = "Reservation lifecycle"),
        (name = "sales", description = "Direct sales and the sales register"),
        (name = "inventory", description = "Stock counters, adjustments and the movement ledger")
    ),
    paths(
        // Reservations
        crate::handlers::reservations::create_reservation,
        crate::handlers::reservations::list_reservations,
        crate::handlers::reservations::get_reservation,
        crate::handlers::reservations::cancel_reservation,
        crate::handlers::reservations::convert_reservation,
        crate::handlers::reservations::review_eligibility,

        // Sales
        crate::handlers::sales::create_sale,
        crate::handlers::sales::list_sales,
        crate::handlers::sales::get_sale,

        // Inventory
        crate::handlers::inventory::list_movements,
        crate::handlers::inventory::create_adjustment,
        crate::handlers::inventory::product_availability,
        crate::handlers::inventory::variant_availability,
    ),
    components(
        schemas(
            crate::handlers::common::LineItemRequest,
            crate::handlers::reservations::CreateReservationRequest,
            crate::handlers::reservations::ConvertReservationRequest,
            crate::handlers::sales::CreateSaleRequest,
            crate::handlers::inventory::StockAdjustmentRequest,
            crate::services::reservations::ReservationSummary,
            crate::services::reservations::LineView,
            crate::services::sales::SaleSummary,
            crate::entities::reservation::ReservationStatus,
            crate::entities::sale::PaymentMethod,
            crate::entities::stock_movement::MovementKind,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
