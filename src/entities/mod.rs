pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_image;
pub mod product_variant;
pub mod quote;
pub mod uploaded_model;
