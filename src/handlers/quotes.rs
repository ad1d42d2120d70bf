use crate::{
    entities::quote::{self, Material, PrintQuality},
    errors::ServiceError,
    handlers::{
        common::{created_response, parse_id},
        AppState,
    },
    services::{
        checkout::CheckoutOutcome,
        quotes::{PricedQuote, QuoteConfig},
    },
    ApiResponse,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Print settings as typed by the customer; material and quality are case-insensitive
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PrintSettings {
    /// `PLA`, `PETG` or `TPU`
    pub material: String,
    /// `draft`, `standard` or `high`
    pub quality: String,
    pub infill_pct: i32,
    pub layer_height_mm: Decimal,
}

impl PrintSettings {
    fn to_config(&self) -> Result<QuoteConfig, ServiceError> {
        Ok(QuoteConfig {
            material: Material::from_str(&self.material)?,
            quality: PrintQuality::from_str(&self.quality)?,
            infill_pct: self.infill_pct,
            layer_height_mm: self.layer_height_mm,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateQuoteRequest {
    pub model_id: Uuid,
    #[serde(flatten)]
    pub settings: PrintSettings,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QuoteCheckoutRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

/// Price a registered model
#[utoipa::path(
    post,
    path = "/api/quote",
    request_body = CreateQuoteRequest,
    responses(
        (status = 201, description = "Quote created, valid for 24 hours", body = ApiResponse<PricedQuote>),
        (status = 400, description = "Unknown material or quality, or out-of-range settings", body = crate::errors::ErrorResponse),
        (status = 404, description = "Model not found", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "quotes"
)]
pub async fn create_quote(
    State(state): State<AppState>,
    Json(request): Json<CreateQuoteRequest>,
) -> Result<Response, ServiceError> {
    let config = request.settings.to_config()?;
    let priced = state
        .services
        .quotes
        .create_quote(request.model_id, config)
        .await?;
    Ok(created_response(ApiResponse::success(priced)))
}

/// Fetch a quote
#[utoipa::path(
    get,
    path = "/api/quote/{id}",
    params(("id" = String, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Quote", body = ApiResponse<quote::Model>),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    tag = "quotes"
)]
pub async fn get_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<quote::Model>>, ServiceError> {
    let id = parse_id(&id, "Quote")?;
    let quote = state.services.quotes.get(id).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Recompute an unexpired quote with new settings
#[utoipa::path(
    post,
    path = "/api/quote/{id}/reprice",
    params(("id" = String, Path, description = "Quote ID")),
    request_body = PrintSettings,
    responses(
        (status = 200, description = "Repriced quote", body = ApiResponse<PricedQuote>),
        (status = 400, description = "Quote expired or invalid settings", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    tag = "quotes"
)]
pub async fn reprice_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(settings): Json<PrintSettings>,
) -> Result<Json<ApiResponse<PricedQuote>>, ServiceError> {
    let id = parse_id(&id, "Quote")?;
    let config = settings.to_config()?;
    let priced = state.services.quotes.reprice(id, config).await?;
    Ok(Json(ApiResponse::success(priced)))
}

/// Order a quote and get the payment page
#[utoipa::path(
    post,
    path = "/api/quote/{id}/checkout",
    params(("id" = String, Path, description = "Quote ID")),
    request_body = QuoteCheckoutRequest,
    responses(
        (status = 201, description = "Order created with status `quoted`", body = ApiResponse<CheckoutOutcome>),
        (status = 400, description = "Invalid email or expired quote", body = crate::errors::ErrorResponse),
        (status = 404, description = "Quote not found", body = crate::errors::ErrorResponse),
    ),
    tag = "quotes"
)]
pub async fn checkout_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<QuoteCheckoutRequest>,
) -> Result<Response, ServiceError> {
    let id = parse_id(&id, "Quote")?;
    let order = state
        .services
        .quotes
        .checkout_quote(id, &request.email, &request.name, &request.phone)
        .await?;
    let (order, redirect_url) = state.services.checkout.request_payment(order).await;
    Ok(created_response(ApiResponse::success(CheckoutOutcome {
        order,
        redirect_url,
    })))
}

pub fn quote_routes() -> Router<AppState> {
    Router::new()
        .route("/api/quote", post(create_quote))
        .route("/api/quote/:id", get(get_quote))
        .route("/api/quote/:id/reprice", post(reprice_quote))
        .route("/api/quote/:id/checkout", post(checkout_quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings(material: &str, quality: &str) -> PrintSettings {
        PrintSettings {
            material: material.into(),
            quality: quality.into(),
            infill_pct: 20,
            layer_height_mm: dec!(0.2),
        }
    }

    #[test]
    fn settings_parse_case_insensitively() {
        let config = settings("petg", "Quality").to_config().unwrap();
        assert_eq!(config.material, Material::Petg);
        assert_eq!(config.quality, PrintQuality::High);
    }

    #[test]
    fn unknown_material_is_a_validation_error() {
        assert!(matches!(
            settings("wood", "draft").to_config(),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            settings("PLA", "ultra").to_config(),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
