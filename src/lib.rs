//! Chroma3D Store library
//!
//! Storefront backend for a 3D-printing shop: catalog, instant quotes, signed-cookie cart,
//! checkout with coupons, MercadoPago payments and the admin back-office.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod rate_limiter;
pub mod services;
pub mod signing;
pub mod telemetry;

use axum::{extract::FromRef, http::HeaderValue, response::Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::AdminTokenService,
    config::AppConfig,
    rate_limiter::RateLimitLayer,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<AdminTokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.services.admin_tokens.clone()
    }
}

// Common response wrappers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: telemetry::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every storefront, payment and admin route plus the Swagger UI.
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(handlers::products::product_routes())
        .merge(handlers::quotes::quote_routes())
        .merge(handlers::cart::cart_routes())
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::payments::payment_routes())
        .merge(handlers::webhooks::webhook_routes())
        .merge(handlers::admin::admin_routes(
            state.services.admin_tokens.clone(),
        ))
        .merge(openapi::swagger_ui())
}

/// CORS from configured origins; permissive only where the config allows it.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::PUT,
                http::Method::DELETE,
            ])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::AUTHORIZATION,
                http::HeaderName::from_static(auth::ADMIN_KEY_HEADER),
            ])
            .allow_credentials(true)
    } else if cfg.should_allow_permissive_cors() {
        info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Fully layered application router.
///
/// Layer order, outermost first: request id, rate limiting, CORS, compression,
/// HTTP tracing, security headers.
pub fn app_router(state: AppState, rate_limit: RateLimitLayer) -> Router {
    let cors = cors_layer(&state.config);

    api_routes(&state)
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers::security_headers_middleware,
        ))
        .layer(telemetry::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(rate_limit)
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            telemetry::scope_request_id(telemetry::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response = telemetry::scope_request_id(telemetry::RequestId::new("meta-err"), async {
            ApiResponse::<()>::error("oops".into())
        })
        .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!response.success);
    }

    #[test]
    fn metadata_without_request_scope_has_no_id() {
        let response = ApiResponse::<()>::validation_errors(vec!["missing".into()]);
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
        assert_eq!(response.errors.unwrap(), vec!["missing".to_string()]);
    }
}
