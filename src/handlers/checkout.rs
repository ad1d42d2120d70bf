use crate::{
    errors::ServiceError,
    handlers::{common::created_response, AppState},
    services::checkout::{CheckoutOutcome, CheckoutRequest},
    ApiResponse,
};
use axum::{extract::State, response::Response, routing::post, Json, Router};

/// Place an order for explicit cart lines
#[utoipa::path(
    post,
    path = "/api/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created; `redirect_url` is the payment page", body = ApiResponse<CheckoutOutcome>),
        (status = 400, description = "Empty cart, invalid contact data or coupon", body = crate::errors::ErrorResponse),
        (status = 409, description = "Coupon usage cap reached", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let outcome = state.services.checkout.place_order(request).await?;
    Ok(created_response(ApiResponse::success(outcome)))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/api/checkout", post(checkout))
}
