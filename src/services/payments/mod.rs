//! Payment gateway abstraction.
//!
//! Checkout asks a [`PaymentGateway`] for a preference (a hosted payment page) and the
//! webhook reconciler asks it for the status of a payment. The production
//! implementation is [`mercadopago::MercadoPagoGateway`].

pub mod mercadopago;

use crate::{errors::ServiceError, services::orders::OrderWithItems};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub use mercadopago::MercadoPagoGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway is not configured")]
    NotConfigured,
    #[error("payment id is empty")]
    MissingPaymentId,
    #[error("payment id {0:?} is not numeric")]
    InvalidPaymentId(String),
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway response is incomplete: {0}")]
    IncompleteResponse(String),
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Hosted payment page created for an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Preference {
    pub id: String,
    pub redirect_url: String,
}

/// Payment status as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub status: String,
    pub external_reference: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a preference for `order`. No retries; callers fall back to the local pay page.
    async fn create_preference(&self, order: &OrderWithItems) -> Result<Preference, GatewayError>;

    /// Looks up a payment and the external reference it echoes back.
    async fn payment_info(&self, payment_id: &str) -> Result<PaymentInfo, GatewayError>;
}
