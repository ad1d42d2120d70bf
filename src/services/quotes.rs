use crate::{
    entities::{
        order::{OrderStatus, ShippingMethod},
        quote::{self, Entity as Quote, Material, PrintQuality},
        uploaded_model::{self, Entity as UploadedModel},
    },
    errors::ServiceError,
    services::{
        orders::{insert_order, NewOrder, NewOrderItem, OrderContact, OrderWithItems},
        pricing::{self, PriceBreakdown, PriceInput},
    },
};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const QUOTE_CURRENCY: &str = "ARS";
pub const QUOTE_TTL_HOURS: i64 = 24;
pub const QUOTE_ITEM_TITLE: &str = "Impresión 3D";

pub static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

/// Print configuration chosen for a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuoteConfig {
    pub material: Material,
    pub quality: PrintQuality,
    pub infill_pct: i32,
    pub layer_height_mm: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterModelRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub owner_email: String,
    pub volume_cm3: Decimal,
    #[validate(range(min = 0))]
    pub estimated_time_min: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricedQuote {
    pub quote: quote::Model,
    pub breakdown: PriceBreakdown,
}

#[derive(Clone)]
pub struct QuoteService {
    db: Arc<DatabaseConnection>,
}

impl QuoteService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Stores geometry metadata for a model analysed elsewhere.
    #[instrument(skip(self, input), fields(filename = %input.filename))]
    pub async fn register_model(
        &self,
        input: RegisterModelRequest,
    ) -> Result<uploaded_model::Model, ServiceError> {
        input.validate()?;
        if input.volume_cm3 <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "volume_cm3 must be greater than zero".to_string(),
            ));
        }

        let model = uploaded_model::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_email: Set(input.owner_email.trim().to_lowercase()),
            filename: Set(input.filename),
            path: Set(input.path),
            volume_cm3: Set(input.volume_cm3),
            estimated_time_min: Set(input.estimated_time_min),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(model_id = %model.id, "uploaded model registered");
        Ok(model)
    }

    fn price_for(
        model: &uploaded_model::Model,
        config: &QuoteConfig,
    ) -> Result<PriceBreakdown, ServiceError> {
        Ok(pricing::calculate(&PriceInput {
            volume_cm3: model.volume_cm3,
            minutes: i64::from(model.estimated_time_min),
            material: config.material,
            quality: config.quality,
            infill_pct: config.infill_pct,
            layer_height_mm: config.layer_height_mm,
        })?)
    }

    async fn model(&self, id: Uuid) -> Result<uploaded_model::Model, ServiceError> {
        UploadedModel::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Uploaded model {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn create_quote(
        &self,
        model_id: Uuid,
        config: QuoteConfig,
    ) -> Result<PricedQuote, ServiceError> {
        let model = self.model(model_id).await?;
        let breakdown = Self::price_for(&model, &config)?;
        let now = Utc::now();

        let quote = quote::ActiveModel {
            id: Set(Uuid::new_v4()),
            uploaded_model_id: Set(model.id),
            material: Set(config.material),
            layer_height_mm: Set(config.layer_height_mm),
            infill_pct: Set(config.infill_pct),
            quality: Set(config.quality),
            price: Set(breakdown.total),
            currency: Set(QUOTE_CURRENCY.to_string()),
            expire_at: Set(now + Duration::hours(QUOTE_TTL_HOURS)),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(quote_id = %quote.id, price = %quote.price, "quote created");
        Ok(PricedQuote { quote, breakdown })
    }

    pub async fn get(&self, id: Uuid) -> Result<quote::Model, ServiceError> {
        Quote::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Quote {} not found", id)))
    }

    /// Recomputes an unexpired quote with a new configuration and restarts its validity window.
    #[instrument(skip(self))]
    pub async fn reprice(
        &self,
        quote_id: Uuid,
        config: QuoteConfig,
    ) -> Result<PricedQuote, ServiceError> {
        let existing = self.get(quote_id).await?;
        if existing.is_expired(Utc::now()) {
            return Err(ServiceError::BadRequest("quote has expired".to_string()));
        }
        let model = self.model(existing.uploaded_model_id).await?;
        let breakdown = Self::price_for(&model, &config)?;

        let mut active: quote::ActiveModel = existing.into();
        active.material = Set(config.material);
        active.quality = Set(config.quality);
        active.infill_pct = Set(config.infill_pct);
        active.layer_height_mm = Set(config.layer_height_mm);
        active.price = Set(breakdown.total);
        active.expire_at = Set(Utc::now() + Duration::hours(QUOTE_TTL_HOURS));
        let quote = active.update(&*self.db).await?;

        Ok(PricedQuote { quote, breakdown })
    }

    /// Creates a `quoted` order with a single line for the quote.
    #[instrument(skip(self, name, phone))]
    pub async fn checkout_quote(
        &self,
        quote_id: Uuid,
        email: &str,
        name: &str,
        phone: &str,
    ) -> Result<OrderWithItems, ServiceError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::ValidationError("invalid email".to_string()));
        }
        let quote = self.get(quote_id).await?;
        if quote.is_expired(Utc::now()) {
            return Err(ServiceError::BadRequest("quote has expired".to_string()));
        }

        let txn = self.db.begin().await?;
        let order = insert_order(
            &txn,
            NewOrder {
                status: OrderStatus::Quoted,
                contact: OrderContact {
                    email,
                    name: name.trim().to_string(),
                    phone: phone.trim().to_string(),
                    ..Default::default()
                },
                shipping_method: ShippingMethod::Retiro,
                shipping_cost: Decimal::ZERO,
                discount: Decimal::ZERO,
                coupon_code: None,
                items: vec![NewOrderItem {
                    product_id: None,
                    quote_id: Some(quote.id),
                    title: QUOTE_ITEM_TITLE.to_string(),
                    color: String::new(),
                    qty: 1,
                    unit_price: quote.price,
                }],
            },
        )
        .await?;
        txn.commit().await?;

        info!(order_id = %order.order.id, %quote_id, "quote checked out");
        Ok(order)
    }
}
