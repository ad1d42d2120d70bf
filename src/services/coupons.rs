use crate::{
    entities::{
        coupon::{self, DiscountType, Entity as Coupon},
        coupon_usage::{self, Entity as CouponUsage},
        order::{self, Entity as Order, OrderStatus},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Reasons a coupon cannot be redeemed, checked in this order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    #[error("coupon code is empty")]
    EmptyCode,
    #[error("an email is required to redeem a coupon")]
    EmailRequired,
    #[error("coupon not found")]
    NotFound,
    #[error("coupon is inactive")]
    Inactive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("minimum purchase not reached (required: ${required:.2})")]
    BelowMinimum { required: Decimal },
    #[error("this coupon was already used with this email")]
    AlreadyUsed,
    #[error("there are {0} pending order(s) with this coupon; complete or cancel them first")]
    PendingOrder(u64),
    #[error("coupon usage limit reached while placing the order")]
    CapRace,
}

impl From<CouponError> for ServiceError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::CapRace => ServiceError::Conflict(err.to_string()),
            other => ServiceError::ValidationError(other.to_string()),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks that depend only on the coupon row.
pub fn check_redeemable(
    coupon: &coupon::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(), CouponError> {
    if !coupon.active {
        return Err(CouponError::Inactive);
    }
    if matches!(coupon.expires_at, Some(expires_at) if now > expires_at) {
        return Err(CouponError::Expired);
    }
    if matches!(coupon.max_uses, Some(max) if coupon.current_uses >= max) {
        return Err(CouponError::UsageLimitReached);
    }
    if subtotal < coupon.min_purchase_amount {
        return Err(CouponError::BelowMinimum {
            required: coupon.min_purchase_amount,
        });
    }
    Ok(())
}

/// Discount for `subtotal`, clamped to `[0, subtotal]`.
pub fn calculate_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        DiscountType::Percentage => (subtotal * coupon.discount_value / dec!(100)).round_dp(2),
        DiscountType::FixedAmount => coupon.discount_value,
    };
    raw.min(subtotal).max(Decimal::ZERO)
}

/// Records a redemption on `conn`. The counter increment is conditional on the cap so
/// concurrent checkouts cannot push `current_uses` past `max_uses`.
#[instrument(skip(conn))]
pub async fn apply_coupon<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    order_id: Uuid,
    email: &str,
    discount_applied: Decimal,
    order_total: Decimal,
) -> Result<(), ServiceError> {
    let updated = Coupon::update_many()
        .col_expr(
            coupon::Column::CurrentUses,
            Expr::col(coupon::Column::CurrentUses).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Id.eq(coupon_id))
        .filter(
            Condition::any()
                .add(coupon::Column::MaxUses.is_null())
                .add(
                    Expr::col(coupon::Column::CurrentUses)
                        .lt(Expr::col(coupon::Column::MaxUses)),
                ),
        )
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        warn!(%coupon_id, %order_id, "coupon cap reached between validation and redemption");
        return Err(CouponError::CapRace.into());
    }

    coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon_id),
        order_id: Set(order_id),
        email: Set(normalize_email(email)),
        discount_applied: Set(discount_applied),
        order_total: Set(order_total),
        used_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    Ok(())
}

/// Input for creating or replacing a coupon
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CouponInput {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_purchase_amount: Decimal,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub description: String,
}

fn default_active() -> bool {
    true
}

impl CouponInput {
    fn check_values(&self) -> Result<(), ServiceError> {
        if normalize_code(&self.code).is_empty() {
            return Err(CouponError::EmptyCode.into());
        }
        if self.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount value must be greater than 0".to_string(),
            ));
        }
        if self.discount_type == DiscountType::Percentage && self.discount_value > dec!(100) {
            return Err(ServiceError::ValidationError(
                "percentage discount cannot exceed 100".to_string(),
            ));
        }
        if self.min_purchase_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "minimum purchase cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CouponStats {
    pub total_uses: i64,
    pub total_discount: Decimal,
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Runs every redemption rule for `code` against `email` and `subtotal`.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        email: &str,
        subtotal: Decimal,
    ) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(code);
        let email = normalize_email(email);
        if code.is_empty() {
            return Err(CouponError::EmptyCode.into());
        }
        if email.is_empty() {
            return Err(CouponError::EmailRequired.into());
        }

        let coupon = self
            .find_by_code(&code)
            .await?
            .ok_or(CouponError::NotFound)?;

        check_redeemable(&coupon, subtotal, Utc::now())?;

        let prior_uses = CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon.id))
            .filter(coupon_usage::Column::Email.eq(email.as_str()))
            .count(&*self.db)
            .await?;
        if prior_uses > 0 {
            return Err(CouponError::AlreadyUsed.into());
        }

        let pending = Order::find()
            .filter(order::Column::Email.eq(email.as_str()))
            .filter(order::Column::CouponCode.eq(code.as_str()))
            .filter(order::Column::Status.eq(OrderStatus::AwaitingPayment))
            .count(&*self.db)
            .await?;
        if pending > 0 {
            return Err(CouponError::PendingOrder(pending).into());
        }

        Ok(coupon)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        input.check_values()?;

        let code = normalize_code(&input.code);
        if self.find_by_code(&code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "a coupon with code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_purchase_amount: Set(input.min_purchase_amount),
            max_uses: Set(input.max_uses),
            current_uses: Set(0),
            expires_at: Set(input.expires_at),
            active: Set(input.active),
            description: Set(input.description),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %created.id, code = %created.code, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: CouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        input.check_values()?;

        let existing = self.get(id).await?;
        let code = normalize_code(&input.code);
        if existing.code != code {
            if let Some(other) = self.find_by_code(&code).await? {
                if other.id != id {
                    return Err(ServiceError::Conflict(format!(
                        "another coupon already uses code {}",
                        code
                    )));
                }
            }
        }

        let mut active: coupon::ActiveModel = existing.into();
        active.code = Set(code);
        active.discount_type = Set(input.discount_type);
        active.discount_value = Set(input.discount_value);
        active.min_purchase_amount = Set(input.min_purchase_amount);
        active.max_uses = Set(input.max_uses);
        active.expires_at = Set(input.expires_at);
        active.active = Set(input.active);
        active.description = Set(input.description);
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn toggle_active(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        let existing = self.get(id).await?;
        let flipped = !existing.active;
        let mut active: coupon::ActiveModel = existing.into();
        active.active = Set(flipped);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        info!(coupon_id = %id, "coupon deleted");
        Ok(())
    }

    /// Newest first. `page` is 1-based.
    pub async fn list(
        &self,
        active_only: bool,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let mut query = Coupon::find().order_by_desc(coupon::Column::CreatedAt);
        if active_only {
            query = query.filter(coupon::Column::Active.eq(true));
        }
        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    #[instrument(skip(self))]
    pub async fn stats(&self, id: Uuid) -> Result<CouponStats, ServiceError> {
        self.get(id).await?;

        let usages = CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(id))
            .all(&*self.db)
            .await?;

        Ok(CouponStats {
            total_uses: usages.len() as i64,
            total_discount: usages.iter().map(|u| u.discount_applied).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rstest::rstest;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "PROMO".into(),
            discount_type,
            discount_value: value,
            min_purchase_amount: Decimal::ZERO,
            max_uses: None,
            current_uses: 0,
            expires_at: None,
            active: true,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case(DiscountType::Percentage, dec!(10), dec!(2500), dec!(250))]
    #[case(DiscountType::Percentage, dec!(100), dec!(2500), dec!(2500))]
    #[case(DiscountType::FixedAmount, dec!(500), dec!(2500), dec!(500))]
    #[case(DiscountType::FixedAmount, dec!(5000), dec!(2500), dec!(2500))]
    #[case(DiscountType::FixedAmount, dec!(-10), dec!(2500), dec!(0))]
    fn discount_cases(
        #[case] kind: DiscountType,
        #[case] value: Decimal,
        #[case] subtotal: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(calculate_discount(&coupon(kind, value), subtotal), expected);
    }

    #[test]
    fn exhausted_coupon_is_rejected() {
        let mut c = coupon(DiscountType::FixedAmount, dec!(100));
        c.max_uses = Some(3);
        c.current_uses = 3;
        assert_eq!(
            check_redeemable(&c, dec!(1000), Utc::now()),
            Err(CouponError::UsageLimitReached)
        );
        c.current_uses = 2;
        assert_eq!(check_redeemable(&c, dec!(1000), Utc::now()), Ok(()));
    }

    #[test]
    fn expired_coupon_is_rejected_before_other_rules() {
        let mut c = coupon(DiscountType::FixedAmount, dec!(100));
        c.expires_at = Some(Utc::now() - Duration::hours(1));
        c.min_purchase_amount = dec!(1_000_000);
        assert_eq!(
            check_redeemable(&c, dec!(10), Utc::now()),
            Err(CouponError::Expired)
        );
    }

    #[test]
    fn inactive_and_minimum_rules() {
        let mut c = coupon(DiscountType::Percentage, dec!(5));
        c.min_purchase_amount = dec!(3000);
        assert_eq!(
            check_redeemable(&c, dec!(2999.99), Utc::now()),
            Err(CouponError::BelowMinimum {
                required: dec!(3000)
            })
        );
        c.active = false;
        assert_eq!(
            check_redeemable(&c, dec!(5000), Utc::now()),
            Err(CouponError::Inactive)
        );
    }

    #[test]
    fn cap_race_maps_to_conflict() {
        let err: ServiceError = CouponError::CapRace.into();
        assert!(matches!(err, ServiceError::Conflict(_)));
        let err: ServiceError = CouponError::Expired.into();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn codes_and_emails_are_normalized() {
        assert_eq!(normalize_code("  verano10 "), "VERANO10");
        assert_eq!(normalize_email(" Ana@Mail.COM "), "ana@mail.com");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn discount_is_clamped_to_subtotal(
            value in 0i64..10_000_000,
            subtotal in 0i64..10_000_000,
            percentage in any::<bool>(),
        ) {
            let kind = if percentage { DiscountType::Percentage } else { DiscountType::FixedAmount };
            let c = coupon(kind, Decimal::new(value, 2));
            let subtotal = Decimal::new(subtotal, 2);
            let discount = calculate_discount(&c, subtotal);
            prop_assert!(discount >= Decimal::ZERO);
            prop_assert!(discount <= subtotal);
        }
    }
}
