use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chroma3D Store API",
        version = "0.1.0",
        description = r#"
# Chroma3D Store

Storefront backend for a 3D-printing shop.

## Features

- **Catalog**: ready-to-ship products with images, colour variants and categories
- **Instant quotes**: price a registered model by material, quality, infill and layer height
- **Cart**: kept client-side in a signed `cart` cookie
- **Checkout**: coupons, shipping methods and MercadoPago payment preferences
- **Payments**: gateway webhooks reconciled idempotently against orders
- **Back-office**: orders, products, coupons and sales reports

## Authentication

Admin endpoints require a session token obtained from `POST /admin/login`. Send it either as
the `admin_token` cookie or in the Authorization header:

```
Authorization: Bearer <admin-token>
```

## Rate Limiting

`/api/*` and `/webhooks/mp` are rate-limited per client IP. Denied requests get `429` with a
`Retry-After` header; `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
accompany every limited response.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Validation error: email is invalid",
  "request_id": "4b1c...",
  "timestamp": "2025-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "products", description = "Public catalog"),
        (name = "quotes", description = "Instant print quotes"),
        (name = "cart", description = "Cookie cart"),
        (name = "checkout", description = "Order placement"),
        (name = "payments", description = "Payment return page and gateway webhooks"),
        (name = "admin", description = "Back-office endpoints")
    ),
    paths(
        crate::handlers::health::health_check,

        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::list_categories,

        crate::handlers::quotes::create_quote,
        crate::handlers::quotes::get_quote,
        crate::handlers::quotes::reprice_quote,
        crate::handlers::quotes::checkout_quote,

        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart,
        crate::handlers::cart::remove_from_cart,
        crate::handlers::cart::checkout_cart,

        crate::handlers::checkout::checkout,

        crate::handlers::payments::payment_page,
        crate::handlers::webhooks::mercadopago_webhook,

        // Admin
        crate::handlers::admin::login,
        crate::handlers::admin::logout,
        crate::handlers::admin::list_orders,
        crate::handlers::admin::get_order,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::list_products,
        crate::handlers::admin::create_product,
        crate::handlers::admin::update_product,
        crate::handlers::admin::delete_product,
        crate::handlers::admin::add_product_images,
        crate::handlers::admin::bulk_delete_products,
        crate::handlers::admin::register_model,
        crate::handlers::admin::list_coupons,
        crate::handlers::admin::create_coupon,
        crate::handlers::admin::update_coupon,
        crate::handlers::admin::delete_coupon,
        crate::handlers::admin::toggle_coupon,
        crate::handlers::admin::coupon_stats,
        crate::handlers::admin::sales_report,
    ),
    components(
        schemas(
            crate::entities::order::OrderStatus,
            crate::entities::order::ShippingMethod,
            crate::entities::quote::Material,
            crate::entities::quote::PrintQuality,
            crate::entities::coupon::DiscountType,
            crate::services::pricing::PriceBreakdown,
            crate::services::cart::Cart,
            crate::services::cart::CartItem,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "AdminKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Admin-Key"))),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
