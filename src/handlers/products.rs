use crate::{
    errors::ServiceError,
    handlers::{
        common::{PaginatedResponse, MAX_PER_PAGE},
        AppState,
    },
    services::products::{ProductFilter, ProductSort, ProductView, DEFAULT_PAGE_SIZE},
    ApiResponse,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::IntoParams;

/// Catalog query string
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductListQuery {
    pub category: Option<String>,
    /// `1`/`true` for in-stock items, `0`/`false` for made-to-order
    pub ready: Option<String>,
    /// `price_asc`, `price_desc`, `newest` or `name`
    pub sort: Option<String>,
    pub q: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ProductListQuery {
    fn into_filter(self) -> ProductFilter {
        let ready_to_ship = match self.ready.as_deref().map(str::trim) {
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            _ => None,
        };
        ProductFilter {
            category: self.category,
            ready_to_ship,
            // unknown sort keys fall back to name order
            sort: self
                .sort
                .as_deref()
                .and_then(|s| ProductSort::from_str(s.trim()).ok())
                .unwrap_or_default(),
            query: self.q,
            page: self.page.unwrap_or(1).max(1),
            page_size: self
                .per_page
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PER_PAGE),
        }
    }
}

/// List products
#[utoipa::path(
    get,
    path = "/api/products",
    params(ProductListQuery),
    responses(
        (status = 200, description = "Products page", body = ApiResponse<PaginatedResponse<ProductView>>,
            headers(
                ("X-RateLimit-Limit" = String, description = "Requests allowed in current window"),
                ("X-RateLimit-Remaining" = String, description = "Remaining requests in window"),
            )
        ),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductView>>>, ServiceError> {
    let filter = query.into_filter();
    let (page, per_page) = (filter.page, filter.page_size);
    let (items, total) = state.services.products.list(filter).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, page, per_page, total,
    ))))
}

/// Get a product by slug
#[utoipa::path(
    get,
    path = "/api/products/{slug}",
    params(("slug" = String, Path, description = "Product slug")),
    responses(
        (status = 200, description = "Product with images and variants", body = ApiResponse<ProductView>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<ProductView>>, ServiceError> {
    let product = state.services.products.get_by_slug(&slug).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// Distinct product categories
#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Sorted categories", body = ApiResponse<Vec<String>>)),
    tag = "catalog"
)]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>, ServiceError> {
    let categories = state.services.products.categories().await?;
    Ok(Json(ApiResponse::success(categories)))
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/product/:slug", get(get_product))
        .route("/api/products", get(list_products))
        .route("/api/products/:slug", get(get_product))
        .route("/api/categories", get(list_categories))
}
