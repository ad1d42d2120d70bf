pub mod admin;
pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod payments;
pub mod products;
pub mod quotes;
pub mod webhooks;

use crate::{
    auth::AdminTokenService,
    config::AppConfig,
    errors::ServiceError,
    services::{
        cart::CartCodec,
        checkout::CheckoutService,
        coupons::CouponService,
        notifications::NotificationQueue,
        orders::OrderService,
        payments::PaymentGateway,
        products::ProductService,
        quotes::QuoteService,
        reconciler::ReconcilerService,
        reports::ReportService,
    },
    signing::TokenSigner,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub products: ProductService,
    pub quotes: QuoteService,
    pub cart: CartCodec,
    pub checkout: CheckoutService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub reconciler: ReconcilerService,
    pub reports: ReportService,
    pub admin_tokens: Arc<AdminTokenService>,
    pub notifications: NotificationQueue,
}

impl AppServices {
    /// Wires every service over one connection pool. `gateway` is `None` when payments
    /// are simulated.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifications: NotificationQueue,
    ) -> Result<Self, ServiceError> {
        let signer = TokenSigner::new(config.signing_key())?;
        let orders = OrderService::new(db.clone());

        Ok(Self {
            products: ProductService::new(db.clone()),
            quotes: QuoteService::new(db.clone()),
            cart: CartCodec::new(signer.clone(), config.is_production()),
            checkout: CheckoutService::new(db.clone(), gateway.clone()),
            coupons: CouponService::new(db),
            reconciler: ReconcilerService::new(
                orders.clone(),
                gateway,
                signer,
                notifications.clone(),
            ),
            reports: ReportService::new(orders.clone()),
            orders,
            admin_tokens: Arc::new(AdminTokenService::from_config(config)),
            notifications,
        })
    }
}
