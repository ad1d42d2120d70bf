use crate::{handlers::AppState, ApiResponse};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

pub const MAX_WEBHOOK_BODY: usize = 64 * 1024;

/// MercadoPago notification body; only `data.id` is used
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PaymentEvent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EventData {
    /// String or number depending on the notification version
    #[schema(value_type = Option<String>)]
    pub id: Option<Value>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct WebhookQuery {
    pub id: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub outcome: String,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Payment id from the body, then `?id=`, then `?data.id=`.
pub fn payment_id(body: &[u8], query: &WebhookQuery) -> String {
    let event: PaymentEvent = if body.len() <= MAX_WEBHOOK_BODY {
        serde_json::from_slice(body).unwrap_or_default()
    } else {
        PaymentEvent::default()
    };

    event
        .data
        .id
        .as_ref()
        .and_then(id_string)
        .filter(|id| !id.is_empty())
        .or_else(|| query.id.clone())
        .or_else(|| query.data_id.clone())
        .map(|id| id.trim().to_string())
        .unwrap_or_default()
}

/// Gateway payment notification
///
/// Always answers 200: anything that cannot be applied is logged and dropped so the
/// gateway does not retry notifications that were understood.
#[utoipa::path(
    post,
    path = "/webhooks/mp",
    params(WebhookQuery),
    request_body = PaymentEvent,
    responses(
        (status = 200, description = "Notification accepted", body = ApiResponse<WebhookAck>),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    query: Option<Query<WebhookQuery>>,
    body: Bytes,
) -> impl IntoResponse {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let payment_id = payment_id(&body, &query);

    let outcome = match state.services.reconciler.reconcile_payment(&payment_id).await {
        Ok(outcome) => {
            info!(payment_id = %payment_id, outcome = %outcome.label(), "webhook processed");
            outcome.label()
        }
        Err(err) => {
            error!(payment_id = %payment_id, error = %err, "webhook processing failed");
            "error".to_string()
        }
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(WebhookAck { outcome })),
    )
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/mp", post(mercadopago_webhook))
}
