// Catalog and pricing
pub mod pricing;
pub mod products;
pub mod quotes;

// Cart and checkout
pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod orders;

// Payments
pub mod payments;
pub mod reconciler;

// Back-office
pub mod notifications;
pub mod reports;
