use crate::{
    entities::{
        order::{OrderStatus, ShippingMethod},
        product,
    },
    errors::ServiceError,
    services::{
        cart::CartItem,
        coupons::{self, calculate_discount, CouponService},
        orders::{insert_order, NewOrder, NewOrderItem, OrderContact, OrderService, OrderWithItems},
        payments::PaymentGateway,
        products::ProductService,
        quotes::is_valid_email,
    },
};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const COURIER_COST: Decimal = dec!(5000);
pub const DEFAULT_COURIER_PROVINCE: &str = "Santa Fe";
const FALLBACK_PROVINCE_COST: Decimal = dec!(9000);

static DNI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7,8}$").unwrap());
static POSTAL_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4,5}$").unwrap());

static PROVINCE_COSTS: Lazy<HashMap<&'static str, Decimal>> = Lazy::new(|| {
    [
        "Santa Fe",
        "Buenos Aires",
        "CABA",
        "Cordoba",
        "Entre Rios",
        "Corrientes",
        "Chaco",
        "Misiones",
        "Formosa",
        "Santiago del Estero",
        "Tucuman",
        "Salta",
        "Jujuy",
        "Catamarca",
        "La Rioja",
        "San Juan",
        "San Luis",
        "Mendoza",
        "La Pampa",
        "Neuquen",
        "Rio Negro",
        "Chubut",
        "Santa Cruz",
        "Tierra del Fuego",
    ]
    .into_iter()
    .map(|p| (p, dec!(9000)))
    .collect()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("the cart is empty")]
    EmptyCart,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("email is not valid")]
    InvalidEmail,
    #[error("dni must have 7 or 8 digits")]
    InvalidDni,
    #[error("postal code must have 4 or 5 digits")]
    InvalidPostalCode,
    #[error("product {0} has no price")]
    Unpriced(String),
}

impl From<CheckoutError> for ServiceError {
    fn from(err: CheckoutError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Cart line resolved against the current catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedLine {
    pub slug: String,
    pub color: String,
    pub qty: i32,
    pub unit_price: Decimal,
    pub product_id: Uuid,
    pub title: String,
}

impl AggregatedLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.qty)
    }
}

/// Merges lines on slug and color, drops non-positive quantities and unknown slugs,
/// and prices each line from the catalog; cart-held prices are ignored. A catalog
/// price of zero or less rejects the cart. First-seen order is kept.
pub fn aggregate_cart(
    lines: &[CartItem],
    catalog: &HashMap<String, product::Model>,
) -> Result<Vec<AggregatedLine>, CheckoutError> {
    let mut out: Vec<AggregatedLine> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for line in lines.iter().filter(|l| l.qty > 0) {
        let Some(product) = catalog.get(&line.slug) else {
            continue;
        };
        if product.base_price <= Decimal::ZERO {
            return Err(CheckoutError::Unpriced(product.slug.clone()));
        }
        let key = (line.slug.clone(), line.color.clone());
        match index.get(&key) {
            Some(&idx) => out[idx].qty = out[idx].qty.saturating_add(line.qty),
            None => {
                index.insert(key, out.len());
                out.push(AggregatedLine {
                    slug: line.slug.clone(),
                    color: line.color.clone(),
                    qty: line.qty,
                    unit_price: product.base_price,
                    product_id: product.id,
                    title: product.name.clone(),
                });
            }
        }
    }
    Ok(out)
}

pub fn shipping_cost(method: ShippingMethod, province: &str) -> Decimal {
    match method {
        ShippingMethod::Retiro => Decimal::ZERO,
        ShippingMethod::Cadete => COURIER_COST,
        ShippingMethod::Envio => {
            let province = province.trim();
            if province.is_empty() {
                return Decimal::ZERO;
            }
            PROVINCE_COSTS
                .get(province)
                .copied()
                .unwrap_or(FALLBACK_PROVINCE_COST)
        }
    }
}

/// Customer data entered at checkout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContactInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub dni: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub province: String,
}

impl ContactInput {
    fn trimmed(mut self) -> Self {
        for field in [
            &mut self.email,
            &mut self.name,
            &mut self.phone,
            &mut self.dni,
            &mut self.address,
            &mut self.postal_code,
            &mut self.province,
        ] {
            *field = field.trim().to_string();
        }
        self.email = self.email.to_lowercase();
        self
    }
}

/// Checks contact data for `method` and fills the courier province default.
pub fn validate_contact(
    method: ShippingMethod,
    contact: ContactInput,
) -> Result<ContactInput, CheckoutError> {
    let mut contact = contact.trimmed();
    if contact.name.is_empty() {
        return Err(CheckoutError::MissingField("name"));
    }
    if contact.email.is_empty() {
        return Err(CheckoutError::MissingField("email"));
    }
    if !is_valid_email(&contact.email) {
        return Err(CheckoutError::InvalidEmail);
    }

    match method {
        ShippingMethod::Envio => {
            for (field, value) in [
                ("province", &contact.province),
                ("address", &contact.address),
                ("postal_code", &contact.postal_code),
                ("dni", &contact.dni),
                ("phone", &contact.phone),
            ] {
                if value.is_empty() {
                    return Err(CheckoutError::MissingField(field));
                }
            }
            if !DNI_RE.is_match(&contact.dni) {
                return Err(CheckoutError::InvalidDni);
            }
            if !POSTAL_CODE_RE.is_match(&contact.postal_code) {
                return Err(CheckoutError::InvalidPostalCode);
            }
        }
        ShippingMethod::Cadete => {
            if contact.address.is_empty() {
                return Err(CheckoutError::MissingField("address"));
            }
            if contact.phone.is_empty() {
                return Err(CheckoutError::MissingField("phone"));
            }
            if contact.province.is_empty() {
                contact.province = DEFAULT_COURIER_PROVINCE.to_string();
            }
        }
        ShippingMethod::Retiro => {
            contact.address.clear();
            contact.province.clear();
        }
    }
    Ok(contact)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    #[serde(default = "default_shipping")]
    pub shipping_method: ShippingMethod,
    #[serde(flatten)]
    pub contact: ContactInput,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

pub fn default_shipping() -> ShippingMethod {
    ShippingMethod::Retiro
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutOutcome {
    pub order: OrderWithItems,
    /// Gateway payment page, or the local `/pay/{id}` page when no preference exists
    pub redirect_url: String,
}

pub fn local_pay_url(order_id: Uuid) -> String {
    format!("/pay/{}", order_id)
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    products: ProductService,
    coupons: CouponService,
    orders: OrderService,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        Self {
            products: ProductService::new(db.clone()),
            coupons: CouponService::new(db.clone()),
            orders: OrderService::new(db.clone()),
            db,
            gateway,
        }
    }

    /// Turns a cart into an `awaiting_payment` order and asks the gateway for a payment page.
    #[instrument(skip(self, request), fields(items = request.items.len(), shipping = %request.shipping_method))]
    pub async fn place_order(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let method = request.shipping_method;
        let contact = validate_contact(method, request.contact)?;

        let slugs: Vec<String> = request.items.iter().map(|i| i.slug.clone()).collect();
        let catalog = self.products.find_by_slugs(&slugs).await?;
        let lines = aggregate_cart(&request.items, &catalog)?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart.into());
        }

        let subtotal: Decimal = lines.iter().map(AggregatedLine::subtotal).sum();
        let shipping = shipping_cost(method, &contact.province);

        let coupon_code = request
            .coupon_code
            .map(|c| coupons::normalize_code(&c))
            .filter(|c| !c.is_empty());
        let coupon = match &coupon_code {
            Some(code) => Some(self.coupons.validate(code, &contact.email, subtotal).await?),
            None => None,
        };
        let discount = coupon
            .as_ref()
            .map(|c| calculate_discount(c, subtotal))
            .unwrap_or(Decimal::ZERO);

        let new_order = NewOrder {
            status: OrderStatus::AwaitingPayment,
            contact: OrderContact {
                email: contact.email,
                name: contact.name,
                phone: contact.phone,
                dni: contact.dni,
                address: contact.address,
                postal_code: contact.postal_code,
                province: contact.province,
            },
            shipping_method: method,
            shipping_cost: shipping,
            discount,
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
            items: lines
                .into_iter()
                .map(|l| NewOrderItem {
                    product_id: Some(l.product_id),
                    quote_id: None,
                    title: l.title,
                    color: l.color,
                    qty: l.qty,
                    unit_price: l.unit_price,
                })
                .collect(),
        };

        let txn = self.db.begin().await?;
        let order = insert_order(&txn, new_order).await?;
        if let Some(coupon) = &coupon {
            coupons::apply_coupon(
                &txn,
                coupon.id,
                order.order.id,
                &order.order.email,
                discount,
                order.order.total,
            )
            .await?;
        }
        txn.commit().await?;

        counter!("checkout_orders_total", 1, "shipping" => method.to_string());
        info!(
            order_id = %order.order.id,
            total = %order.order.total,
            discount = %discount,
            "order placed"
        );

        let (order, redirect_url) = self.request_payment(order).await;
        Ok(CheckoutOutcome {
            order,
            redirect_url,
        })
    }

    /// Requests a preference for a stored order. Failures fall back to the local pay page.
    pub async fn request_payment(&self, mut order: OrderWithItems) -> (OrderWithItems, String) {
        let fallback = local_pay_url(order.order.id);
        let Some(gateway) = &self.gateway else {
            return (order, fallback);
        };

        match gateway.create_preference(&order).await {
            Ok(pref) => {
                if let Err(err) = self.orders.set_preference_id(order.order.id, &pref.id).await {
                    warn!(order_id = %order.order.id, error = %err, "could not store preference id");
                }
                order.order.mp_preference_id = Some(pref.id);
                (order, pref.redirect_url)
            }
            Err(err) => {
                warn!(order_id = %order.order.id, error = %err, "preference creation failed; using local pay page");
                (order, fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn product(slug: &str, price: Decimal) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            slug: slug.into(),
            name: slug.to_uppercase(),
            base_price: price,
            category: String::new(),
            short_desc: String::new(),
            ready_to_ship: true,
            width_mm: Decimal::ZERO,
            height_mm: Decimal::ZERO,
            depth_mm: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(slug: &str, color: &str, qty: i32, price: Decimal) -> CartItem {
        CartItem {
            slug: slug.into(),
            color: color.into(),
            qty,
            price,
        }
    }

    fn catalog() -> HashMap<String, product::Model> {
        [
            product("vaso", dec!(1000)),
            product("maceta", dec!(500)),
        ]
        .into_iter()
        .map(|p| (p.slug.clone(), p))
        .collect()
    }

    #[test]
    fn aggregation_merges_and_reprices() {
        let lines = vec![
            line("vaso", "rojo", 1, dec!(1)),
            line("maceta", "", 1, dec!(1)),
            line("vaso", "rojo", 1, dec!(1)),
            line("vaso", "azul", 0, dec!(1)),
            line("desconocido", "", 3, dec!(99)),
        ];
        let out = aggregate_cart(&lines, &catalog()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].slug.as_str(), out[0].qty), ("vaso", 2));
        assert_eq!(out[0].unit_price, dec!(1000));
        assert_eq!(out[0].title, "VASO");
        assert_eq!(out[1].slug, "maceta");
        assert_eq!(out[1].unit_price, dec!(500));
    }

    #[test]
    fn unpriced_product_rejects_the_cart() {
        let mut catalog = catalog();
        let free = product("muestra", Decimal::ZERO);
        catalog.insert(free.slug.clone(), free);
        let lines = vec![
            line("vaso", "", 1, dec!(1000)),
            line("muestra", "", 1, dec!(-1000)),
        ];
        assert_eq!(
            aggregate_cart(&lines, &catalog),
            Err(CheckoutError::Unpriced("muestra".into()))
        );
    }

    #[test]
    fn all_lines_filtered_leaves_nothing() {
        let lines = vec![line("vaso", "", 0, dec!(1)), line("vaso", "", -2, dec!(1))];
        assert!(aggregate_cart(&lines, &catalog()).unwrap().is_empty());
    }

    #[test]
    fn order_total_matches_items_plus_shipping() {
        let lines = vec![
            line("vaso", "", 2, dec!(1000)),
            line("maceta", "", 1, dec!(500)),
        ];
        let out = aggregate_cart(&lines, &catalog()).unwrap();
        let subtotal: Decimal = out.iter().map(AggregatedLine::subtotal).sum();
        assert_eq!(
            subtotal + shipping_cost(ShippingMethod::Envio, "Cordoba"),
            dec!(11500)
        );
    }

    #[rstest]
    #[case(ShippingMethod::Retiro, "Mendoza", dec!(0))]
    #[case(ShippingMethod::Cadete, "", dec!(5000))]
    #[case(ShippingMethod::Envio, "Tierra del Fuego", dec!(9000))]
    #[case(ShippingMethod::Envio, "Atlantida", dec!(9000))]
    #[case(ShippingMethod::Envio, "  ", dec!(0))]
    fn shipping_table(
        #[case] method: ShippingMethod,
        #[case] province: &str,
        #[case] expected: Decimal,
    ) {
        assert_eq!(shipping_cost(method, province), expected);
    }

    #[test]
    fn province_table_has_every_province() {
        assert_eq!(PROVINCE_COSTS.len(), 24);
    }

    fn contact() -> ContactInput {
        ContactInput {
            email: " Ana@Mail.com ".into(),
            name: "Ana".into(),
            phone: "341555".into(),
            dni: "30123456".into(),
            address: "Calle 1".into(),
            postal_code: "2000".into(),
            province: "Santa Fe".into(),
        }
    }

    #[test]
    fn envio_requires_formatted_fields() {
        let ok = validate_contact(ShippingMethod::Envio, contact()).unwrap();
        assert_eq!(ok.email, "ana@mail.com");

        let bad_dni = ContactInput {
            dni: "123".into(),
            ..contact()
        };
        assert_eq!(
            validate_contact(ShippingMethod::Envio, bad_dni),
            Err(CheckoutError::InvalidDni)
        );

        let bad_cp = ContactInput {
            postal_code: "S2000".into(),
            ..contact()
        };
        assert_eq!(
            validate_contact(ShippingMethod::Envio, bad_cp),
            Err(CheckoutError::InvalidPostalCode)
        );

        let no_phone = ContactInput {
            phone: String::new(),
            ..contact()
        };
        assert_eq!(
            validate_contact(ShippingMethod::Envio, no_phone),
            Err(CheckoutError::MissingField("phone"))
        );
    }

    #[test]
    fn cadete_defaults_province_and_pickup_needs_little() {
        let c = ContactInput {
            province: String::new(),
            dni: String::new(),
            postal_code: String::new(),
            ..contact()
        };
        let ok = validate_contact(ShippingMethod::Cadete, c).unwrap();
        assert_eq!(ok.province, "Santa Fe");

        let pickup = ContactInput {
            email: "ana@mail.com".into(),
            name: "Ana".into(),
            ..Default::default()
        };
        assert!(validate_contact(ShippingMethod::Retiro, pickup).is_ok());

        let bad_email = ContactInput {
            email: "ana@".into(),
            ..contact()
        };
        assert_eq!(
            validate_contact(ShippingMethod::Retiro, bad_email),
            Err(CheckoutError::InvalidEmail)
        );
    }
}
