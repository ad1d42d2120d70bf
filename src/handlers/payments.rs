use crate::{
    errors::ServiceError,
    handlers::{common::parse_id, AppState},
    services::{orders::OrderWithItems, reconciler::APPROVED},
    ApiResponse,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};

/// Parameters the gateway appends when it sends the buyer back
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PayReturnQuery {
    pub status: Option<String>,
    pub collection_status: Option<String>,
    pub payment_id: Option<String>,
}

impl PayReturnQuery {
    fn status(&self) -> String {
        self.status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.collection_status.as_deref())
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentPage {
    pub order: OrderWithItems,
    pub success: bool,
    pub message: String,
    pub payments_simulated: bool,
}

fn status_message(mp_status: &str) -> &'static str {
    match mp_status {
        APPROVED => "Pago aprobado. Gracias por tu compra.",
        "rejected" => "El pago fue rechazado.",
        _ => "Pago pendiente / simulado",
    }
}

/// Payment result page for an order
///
/// With a gateway, a `payment_id` is reconciled against the gateway exactly like a webhook.
/// Without one, `status` (or `collection_status`) is applied directly.
#[utoipa::path(
    get,
    path = "/pay/{id}",
    params(("id" = String, Path, description = "Order ID"), PayReturnQuery),
    responses(
        (status = 200, description = "Order and payment status", body = ApiResponse<PaymentPage>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn payment_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PayReturnQuery>,
) -> Result<Json<ApiResponse<PaymentPage>>, ServiceError> {
    let order_id = parse_id(&id, "Order")?;
    let reconciler = &state.services.reconciler;

    let order = if reconciler.payments_simulated() {
        reconciler
            .apply_return_status(order_id, &query.status())
            .await?
    } else {
        if let Some(payment_id) = query.payment_id.as_deref().filter(|p| !p.trim().is_empty()) {
            if let Err(err) = reconciler.reconcile_payment(payment_id).await {
                warn!(%order_id, payment_id, error = %err, "return reconciliation failed");
            }
        }
        state.services.orders.get(order_id).await?
    };

    let mp_status = order.order.mp_status.trim().to_lowercase();
    Ok(Json(ApiResponse::success(PaymentPage {
        success: mp_status == APPROVED,
        message: status_message(&mp_status).to_string(),
        payments_simulated: reconciler.payments_simulated(),
        order,
    })))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/pay/:id", get(payment_page))
}
