use crate::{
    auth::{
        admin_cookie, clear_admin_cookie, require_admin, AdminSession, AdminTokenError,
        AdminTokenService, ADMIN_KEY_HEADER,
    },
    entities::{
        coupon,
        order::{self, OrderStatus},
        product_image, uploaded_model,
    },
    errors::ServiceError,
    handlers::{
        common::{
            created_response, no_content_response, parse_id, validate_input, PaginatedResponse,
            PaginationParams,
        },
        products::ProductListQuery,
        AppState,
    },
    services::{
        coupons::{CouponInput, CouponStats},
        orders::{OrderFilter, OrderWithItems},
        products::{BulkDeleteResult, CreateProductRequest, ImageInput, ProductView, UpdateProductRequest},
        quotes::RegisterModelRequest,
        reconciler::APPROVED,
        reports::{to_csv, SalesReport},
    },
    ApiResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    /// Token lifetime in seconds
    pub expires_in: i64,
}

/// Exchange the admin key and an allow-listed email for a token
#[utoipa::path(
    post,
    path = "/admin/login",
    request_body = LoginRequest,
    params(("X-Admin-Key" = String, Header, description = "Shared admin key")),
    responses(
        (status = 200, description = "Token issued; also set as the `admin_token` cookie", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Wrong admin key"),
        (status = 403, description = "Email not allowed"),
    ),
    tag = "admin"
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AdminTokenError> {
    let tokens = &state.services.admin_tokens;
    let presented = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tokens.check_api_key(presented)?;

    let token = tokens.issue(&request.email)?;
    let email = request.email.trim().to_lowercase();
    info!(admin = %email, "admin logged in");

    let cookie = admin_cookie(
        &token,
        state.config.admin_cookie_max_age_secs,
        state.config.is_production(),
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(LoginResponse {
            token,
            email,
            expires_in: tokens.ttl_secs(),
        })),
    )
        .into_response())
}

/// Clear the admin cookie
#[utoipa::path(
    post,
    path = "/admin/logout",
    responses((status = 200, description = "Cookie cleared", body = ApiResponse<bool>)),
    tag = "admin"
)]
pub async fn logout(State(state): State<AppState>) -> Response {
    (
        [(
            header::SET_COOKIE,
            clear_admin_cookie(state.config.is_production()),
        )],
        Json(ApiResponse::success(true)),
    )
        .into_response()
}

// ---- orders ----

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AdminOrdersQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// `1` keeps only orders whose payment was approved
    pub approved: Option<String>,
    pub status: Option<String>,
}

impl AdminOrdersQuery {
    fn into_filter(self) -> Result<OrderFilter, ServiceError> {
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(OrderStatus::from_str(raw).map_err(|_| {
                ServiceError::ValidationError(format!("unknown order status: {}", raw))
            })?),
            None => None,
        };
        let approved = matches!(self.approved.as_deref().map(str::trim), Some("1") | Some("true"));
        let (page, page_size) = PaginationParams {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(20),
        }
        .normalized();
        Ok(OrderFilter {
            status,
            mp_status: approved.then(|| APPROVED.to_string()),
            page,
            page_size,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/admin/orders",
    params(AdminOrdersQuery),
    responses(
        (status = 200, description = "Orders page", body = ApiResponse<PaginatedResponse<OrderWithItems>>),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not logged in"),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderWithItems>>>, ServiceError> {
    let filter = query.into_filter()?;
    let (page, per_page) = (filter.page, filter.page_size);
    let (orders, total) = state.services.orders.list(filter).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, page, per_page, total,
    ))))
}

#[utoipa::path(
    get,
    path = "/admin/orders/{id}",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let id = parse_id(&id, "Order")?;
    let order = state.services.orders.get(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Move an order to any status
#[utoipa::path(
    put,
    path = "/admin/orders/{id}/status",
    params(("id" = String, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = ApiResponse<order::Model>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let id = parse_id(&id, "Order")?;
    let status = OrderStatus::from_str(request.status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("unknown order status: {}", request.status))
    })?;
    let order = state.services.orders.update_status(id, status).await?;
    info!(admin = %session.email, order_id = %id, status = %status, "order status changed by admin");
    Ok(Json(ApiResponse::success(order)))
}

// ---- products ----

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkDeleteRequest {
    pub slugs: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/admin/products",
    params(ProductListQuery),
    responses((status = 200, description = "Products page", body = ApiResponse<PaginatedResponse<ProductView>>)),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_products(
    state: State<AppState>,
    query: Query<ProductListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductView>>>, ServiceError> {
    crate::handlers::products::list_products(state, query).await
}

#[utoipa::path(
    post,
    path = "/admin/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductView>),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse),
        (status = 409, description = "Slug already taken", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    session: AdminSession,
    Json(request): Json<CreateProductRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let product = state.services.products.create(request).await?;
    info!(admin = %session.email, slug = %product.product.slug, "product created");
    Ok(created_response(ApiResponse::success(product)))
}

#[utoipa::path(
    put,
    path = "/admin/products/{slug}",
    params(("slug" = String, Path, description = "Product slug")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Product updated", body = ApiResponse<ProductView>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductView>>, ServiceError> {
    let product = state.services.products.update(&slug, request).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// Remove a product with its images and variants; returns the image URLs for storage cleanup
#[utoipa::path(
    delete,
    path = "/admin/products/{slug}",
    params(("slug" = String, Path, description = "Product slug")),
    responses(
        (status = 200, description = "Deleted; image URLs of the product", body = ApiResponse<Vec<String>>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    session: AdminSession,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>, ServiceError> {
    let image_urls = state.services.products.delete_by_slug(&slug).await?;
    info!(admin = %session.email, slug = %slug, "product deleted");
    Ok(Json(ApiResponse::success(image_urls)))
}

#[utoipa::path(
    post,
    path = "/admin/products/{slug}/images",
    params(("slug" = String, Path, description = "Product slug")),
    request_body = Vec<ImageInput>,
    responses(
        (status = 201, description = "Images attached", body = ApiResponse<Vec<product_image::Model>>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn add_product_images(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(images): Json<Vec<ImageInput>>,
) -> Result<Response, ServiceError> {
    for image in &images {
        validate_input(image)?;
    }
    let images = state.services.products.add_images(&slug, images).await?;
    Ok(created_response(ApiResponse::success(images)))
}

#[utoipa::path(
    post,
    path = "/admin/products/bulk-delete",
    request_body = BulkDeleteRequest,
    responses((status = 200, description = "Deleted and missing slugs", body = ApiResponse<BulkDeleteResult>)),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn bulk_delete_products(
    State(state): State<AppState>,
    session: AdminSession,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<ApiResponse<BulkDeleteResult>>, ServiceError> {
    let result = state.services.products.bulk_delete(request.slugs).await?;
    info!(
        admin = %session.email,
        deleted = result.deleted.len(),
        not_found = result.not_found.len(),
        "bulk product delete"
    );
    Ok(Json(ApiResponse::success(result)))
}

/// Register geometry metadata for a model analysed elsewhere
#[utoipa::path(
    post,
    path = "/admin/models",
    request_body = RegisterModelRequest,
    responses(
        (status = 201, description = "Model registered", body = ApiResponse<uploaded_model::Model>),
        (status = 400, description = "Invalid model metadata", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn register_model(
    State(state): State<AppState>,
    Json(request): Json<RegisterModelRequest>,
) -> Result<Response, ServiceError> {
    let model = state.services.quotes.register_model(request).await?;
    Ok(created_response(ApiResponse::success(model)))
}

// ---- coupons ----

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CouponListQuery {
    /// `1` lists only active coupons
    pub active: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/admin/coupons",
    params(CouponListQuery),
    responses((status = 200, description = "Coupons page", body = ApiResponse<PaginatedResponse<coupon::Model>>)),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<CouponListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<coupon::Model>>>, ServiceError> {
    let active_only = matches!(query.active.as_deref().map(str::trim), Some("1") | Some("true"));
    let (page, per_page) = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }
    .normalized();
    let (coupons, total) = state
        .services
        .coupons
        .list(active_only, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        coupons, page, per_page, total,
    ))))
}

#[utoipa::path(
    post,
    path = "/admin/coupons",
    request_body = CouponInput,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<coupon::Model>),
        (status = 400, description = "Invalid coupon", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    session: AdminSession,
    Json(input): Json<CouponInput>,
) -> Result<Response, ServiceError> {
    let coupon = state.services.coupons.create(input).await?;
    info!(admin = %session.email, code = %coupon.code, "coupon created");
    Ok(created_response(ApiResponse::success(coupon)))
}

#[utoipa::path(
    put,
    path = "/admin/coupons/{id}",
    params(("id" = String, Path, description = "Coupon ID")),
    request_body = CouponInput,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<coupon::Model>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CouponInput>,
) -> Result<Json<ApiResponse<coupon::Model>>, ServiceError> {
    let id = parse_id(&id, "Coupon")?;
    let coupon = state.services.coupons.update(id, input).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    delete,
    path = "/admin/coupons/{id}",
    params(("id" = String, Path, description = "Coupon ID")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<Response, ServiceError> {
    let id = parse_id(&id, "Coupon")?;
    state.services.coupons.delete(id).await?;
    info!(admin = %session.email, coupon_id = %id, "coupon deleted");
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/admin/coupons/{id}/toggle",
    params(("id" = String, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon with flipped `active` flag", body = ApiResponse<coupon::Model>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn toggle_coupon(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<coupon::Model>>, ServiceError> {
    let id = parse_id(&id, "Coupon")?;
    let coupon = state.services.coupons.toggle_active(id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    get,
    path = "/admin/coupons/{id}/stats",
    params(("id" = String, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Usage totals", body = ApiResponse<CouponStats>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn coupon_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<CouponStats>>, ServiceError> {
    let id = parse_id(&id, "Coupon")?;
    let stats = state.services.coupons.stats(id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

// ---- sales ----

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SalesQuery {
    /// `YYYY-MM-DD`, defaults to 30 days before `to`
    pub from: Option<String>,
    /// `YYYY-MM-DD`, defaults to today
    pub to: Option<String>,
    /// `csv` for a spreadsheet download
    pub format: Option<String>,
}

/// Approved sales report, as JSON or CSV
#[utoipa::path(
    get,
    path = "/admin/sales",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales report; `text/csv` attachment when `format=csv`", body = ApiResponse<SalesReport>),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn sales_report(
    State(state): State<AppState>,
    Query(query): Query<SalesQuery>,
) -> Result<Response, ServiceError> {
    let report = state
        .services
        .reports
        .sales_report(query.from.as_deref(), query.to.as_deref())
        .await?;

    let wants_csv = query
        .format
        .as_deref()
        .is_some_and(|f| f.trim().eq_ignore_ascii_case("csv"));
    if wants_csv {
        let disposition = format!("attachment; filename={}", report.csv_filename());
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            to_csv(&report),
        )
            .into_response());
    }

    Ok(Json(ApiResponse::success(report)).into_response())
}

/// Back-office routes; everything except login sits behind an admin session.
pub fn admin_routes(tokens: Arc<AdminTokenService>) -> Router<AppState> {
    let protected = Router::new()
        .route("/admin/logout", post(logout))
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id", get(get_order))
        .route("/admin/orders/:id/status", put(update_order_status))
        .route("/admin/products", get(list_products).post(create_product))
        .route("/admin/products/bulk-delete", post(bulk_delete_products))
        .route(
            "/admin/products/:slug",
            put(update_product).delete(delete_product),
        )
        .route("/admin/products/:slug/images", post(add_product_images))
        .route("/admin/models", post(register_model))
        .route("/admin/coupons", get(list_coupons).post(create_coupon))
        .route(
            "/admin/coupons/:id",
            put(update_coupon).delete(delete_coupon),
        )
        .route("/admin/coupons/:id/toggle", post(toggle_coupon))
        .route("/admin/coupons/:id/stats", get(coupon_stats))
        .route("/admin/sales", get(sales_report))
        .route_layer(middleware::from_fn_with_state(tokens, require_admin));

    Router::new()
        .route("/admin/login", post(login))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_flag_filters_by_gateway_status() {
        let filter = AdminOrdersQuery {
            approved: Some("1".into()),
            status: Some("FINISHED".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.mp_status.as_deref(), Some("approved"));
        assert_eq!(filter.status, Some(OrderStatus::Finished));
        assert_eq!(filter.page, 1);
    }

    #[test]
    fn unknown_status_filter_is_rejected() {
        let result = AdminOrdersQuery {
            status: Some("lost".into()),
            ..Default::default()
        }
        .into_filter();
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }
}
