use crate::{
    entities::order::ShippingMethod,
    errors::ServiceError,
    handlers::AppState,
    services::{
        cart::{cookie_value, Cart, CartItem, QtyUpdate, CART_COOKIE},
        checkout::{default_shipping, CheckoutRequest, ContactInput},
    },
    ApiResponse,
};
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

/// Cart contents with derived totals
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub count: i32,
    pub subtotal: Decimal,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self {
            items: cart.items.clone(),
            count: cart.count(),
            subtotal: cart.subtotal(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CartLineRequest {
    pub slug: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateCartRequest {
    pub slug: String,
    #[serde(default)]
    pub color: String,
    /// `inc`, `dec` or `set`
    pub op: String,
    /// Required for `set`
    pub qty: Option<i32>,
}

impl UpdateCartRequest {
    fn qty_update(&self) -> Result<QtyUpdate, ServiceError> {
        match self.op.trim().to_ascii_lowercase().as_str() {
            "inc" => Ok(QtyUpdate::Inc),
            "dec" => Ok(QtyUpdate::Dec),
            "set" => self
                .qty
                .map(QtyUpdate::Set)
                .ok_or_else(|| ServiceError::ValidationError("qty is required for set".into())),
            other => Err(ServiceError::ValidationError(format!(
                "unknown cart operation: {}",
                other
            ))),
        }
    }
}

/// Checkout of the cookie cart; the lines come from the cookie, not the body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CartCheckoutRequest {
    #[serde(default = "default_shipping")]
    pub shipping_method: ShippingMethod,
    #[serde(flatten)]
    pub contact: ContactInput,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

fn read_cart(state: &AppState, headers: &HeaderMap) -> Cart {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| cookie_value(raw, CART_COOKIE))
        .map(|token| state.services.cart.decode(token))
        .unwrap_or_default()
}

fn cart_response(state: &AppState, cart: &Cart) -> Response {
    (
        [(header::SET_COOKIE, state.services.cart.set_cookie(cart))],
        Json(ApiResponse::success(CartView::from(cart))),
    )
        .into_response()
}

/// Current cart
#[utoipa::path(
    get,
    path = "/cart",
    responses((status = 200, description = "Cart contents", body = ApiResponse<CartView>)),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<ApiResponse<CartView>> {
    let cart = read_cart(&state, &headers);
    Json(ApiResponse::success(CartView::from(&cart)))
}

/// Add one unit of a product
#[utoipa::path(
    post,
    path = "/cart",
    request_body = CartLineRequest,
    responses(
        (status = 200, description = "Updated cart; the cookie is refreshed", body = ApiResponse<CartView>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CartLineRequest>,
) -> Result<Response, ServiceError> {
    let slug = request.slug.trim();
    let product = state
        .services
        .products
        .find_by_slug(slug)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;

    let mut cart = read_cart(&state, &headers);
    cart.add(&product.slug, request.color.trim(), product.base_price);
    Ok(cart_response(&state, &cart))
}

/// Change the quantity of a line
#[utoipa::path(
    post,
    path = "/cart/update",
    request_body = UpdateCartRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Unknown operation", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn update_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateCartRequest>,
) -> Result<Response, ServiceError> {
    let op = request.qty_update()?;
    let mut cart = read_cart(&state, &headers);
    cart.update(request.slug.trim(), request.color.trim(), op);
    Ok(cart_response(&state, &cart))
}

/// Remove a line
#[utoipa::path(
    post,
    path = "/cart/remove",
    request_body = CartLineRequest,
    responses((status = 200, description = "Updated cart", body = ApiResponse<CartView>)),
    tag = "cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CartLineRequest>,
) -> Response {
    let mut cart = read_cart(&state, &headers);
    cart.remove(request.slug.trim(), request.color.trim());
    cart_response(&state, &cart)
}

/// Place an order for the cookie cart and redirect to the payment page
#[utoipa::path(
    post,
    path = "/cart/checkout",
    request_body = CartCheckoutRequest,
    responses(
        (status = 303, description = "Order created; `Location` is the payment page and the cart cookie is cleared"),
        (status = 400, description = "Empty cart, invalid contact data or coupon", body = crate::errors::ErrorResponse),
        (status = 409, description = "Coupon usage cap reached", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn checkout_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CartCheckoutRequest>,
) -> Result<Response, ServiceError> {
    let cart = read_cart(&state, &headers);
    let outcome = state
        .services
        .checkout
        .place_order(CheckoutRequest {
            items: cart.items,
            shipping_method: request.shipping_method,
            contact: request.contact,
            coupon_code: request.coupon_code,
        })
        .await?;

    info!(order_id = %outcome.order.order.id, "cart checked out");
    Ok((
        [(header::SET_COOKIE, state.services.cart.clear_cookie())],
        Redirect::to(&outcome.redirect_url),
    )
        .into_response())
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).post(add_to_cart))
        .route("/cart/update", post(update_cart))
        .route("/cart/remove", post(remove_from_cart))
        .route("/cart/checkout", post(checkout_cart))
}
