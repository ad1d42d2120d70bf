use super::{GatewayError, PaymentGateway, PaymentInfo, Preference};
use crate::{
    config::AppConfig,
    entities::order::ShippingMethod,
    services::orders::OrderWithItems,
    signing::TokenSigner,
};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const CURRENCY_ID: &str = "ARS";
pub const STATEMENT_DESCRIPTOR: &str = "CHROMA3D";

#[derive(Debug, Serialize)]
struct PreferenceItem {
    title: String,
    quantity: i32,
    unit_price: f64,
    currency_id: &'static str,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    pending: String,
    failure: String,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem>,
    payer: Payer<'a>,
    back_urls: BackUrls,
    auto_return: &'static str,
    notification_url: String,
    statement_descriptor: &'static str,
    external_reference: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    init_point: String,
    #[serde(default)]
    sandbox_init_point: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    external_reference: String,
}

fn money(value: Decimal) -> f64 {
    value.round_dp(2).to_f64().unwrap_or_default()
}

/// MercadoPago Checkout Pro client
#[derive(Clone)]
pub struct MercadoPagoGateway {
    client: Client,
    token: String,
    api_base: String,
    public_base: String,
    sandbox: bool,
    signer: TokenSigner,
}

impl std::fmt::Debug for MercadoPagoGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoGateway")
            .field("api_base", &self.api_base)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl MercadoPagoGateway {
    pub fn new(
        token: impl Into<String>,
        api_base: impl Into<String>,
        public_base: impl Into<String>,
        timeout: Duration,
        sandbox: bool,
        signer: TokenSigner,
    ) -> Result<Self, GatewayError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
            sandbox,
            signer,
        })
    }

    /// Gateway for `config`, or `None` when payments are simulated.
    pub fn from_config(
        config: &AppConfig,
        signer: TokenSigner,
    ) -> Result<Option<Self>, GatewayError> {
        let Some(token) = config.mp_access_token.as_deref().filter(|t| !t.trim().is_empty())
        else {
            return Ok(None);
        };
        // TEST- tokens only have sandbox checkout pages
        let sandbox = token.starts_with("TEST-") && !config.is_production();
        Self::new(
            token,
            config.mp_api_base_url.as_str(),
            config.base_url(),
            Duration::from_secs(config.mp_timeout_secs),
            sandbox,
            signer,
        )
        .map(Some)
    }

    fn build_request<'a>(&self, order: &'a OrderWithItems) -> PreferenceRequest<'a> {
        let o = &order.order;
        let mut items = Vec::with_capacity(order.items.len() + 1);

        if o.discount > Decimal::ZERO {
            // negative lines are rejected, so a discounted order becomes a single line
            items.push(PreferenceItem {
                title: format!("Pedido {}", o.short_id()),
                quantity: 1,
                unit_price: money(o.total),
                currency_id: CURRENCY_ID,
            });
        } else {
            items.extend(order.items.iter().map(|it| PreferenceItem {
                title: it.title.clone(),
                quantity: it.qty,
                unit_price: money(it.unit_price),
                currency_id: CURRENCY_ID,
            }));
            if o.shipping_cost > Decimal::ZERO {
                let title = match o.shipping_method {
                    ShippingMethod::Cadete => "Cadete (Rosario)",
                    _ => "Envío",
                };
                items.push(PreferenceItem {
                    title: title.to_string(),
                    quantity: 1,
                    unit_price: money(o.shipping_cost),
                    currency_id: CURRENCY_ID,
                });
            }
        }

        let pay_url = format!("{}/pay/{}", self.public_base, o.id);
        PreferenceRequest {
            items,
            payer: Payer { email: &o.email },
            back_urls: BackUrls {
                success: pay_url.clone(),
                pending: pay_url.clone(),
                failure: pay_url,
            },
            auto_return: "approved",
            notification_url: format!("{}/webhooks/mp", self.public_base),
            statement_descriptor: STATEMENT_DESCRIPTOR,
            external_reference: self.signer.external_reference(o.id),
        }
    }

    async fn error_for(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        GatewayError::Status { status, body }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    #[instrument(skip(self, order), fields(order_id = %order.order.id))]
    async fn create_preference(&self, order: &OrderWithItems) -> Result<Preference, GatewayError> {
        let body = self.build_request(order);
        debug!(items = body.items.len(), total = %order.order.total, "building payment preference");

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if response.status().as_u16() >= 300 {
            return Err(Self::error_for(response).await);
        }

        let pref: PreferenceResponse = response.json().await?;
        if pref.id.is_empty() {
            return Err(GatewayError::IncompleteResponse("missing preference id".into()));
        }
        let redirect_url = if self.sandbox && !pref.sandbox_init_point.is_empty() {
            pref.sandbox_init_point
        } else {
            pref.init_point
        };
        if redirect_url.is_empty() {
            return Err(GatewayError::IncompleteResponse("missing init point".into()));
        }

        info!(preference_id = %pref.id, sandbox = self.sandbox, "payment preference created");
        Ok(Preference {
            id: pref.id,
            redirect_url,
        })
    }

    #[instrument(skip(self))]
    async fn payment_info(&self, payment_id: &str) -> Result<PaymentInfo, GatewayError> {
        let payment_id = payment_id.trim();
        if payment_id.is_empty() {
            return Err(GatewayError::MissingPaymentId);
        }
        // ids are numeric; anything else never reaches the authenticated request path
        if !payment_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GatewayError::InvalidPaymentId(payment_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.api_base, payment_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status().as_u16() >= 300 {
            return Err(Self::error_for(response).await);
        }

        let payment: PaymentResponse = response.json().await?;
        Ok(PaymentInfo {
            status: payment.status,
            external_reference: payment.external_reference,
        })
    }
}
