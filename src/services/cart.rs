//! Session cart kept client-side in a signed cookie.

use crate::signing::TokenSigner;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const CART_COOKIE: &str = "cart";
pub const CART_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub slug: String,
    #[serde(default)]
    pub color: String,
    pub qty: i32,
    /// Price shown when the item was added; checkout re-resolves it
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "op", content = "qty", rename_all = "snake_case")]
pub enum QtyUpdate {
    Inc,
    Dec,
    Set(i32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<CartItem>,
}

impl Cart {
    fn position(&self, slug: &str, color: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.slug == slug && i.color == color)
    }

    /// Adds one unit, merging with an existing slug+color line.
    pub fn add(&mut self, slug: &str, color: &str, price: Decimal) {
        match self.position(slug, color) {
            Some(idx) => self.items[idx].qty += 1,
            None => self.items.push(CartItem {
                slug: slug.to_string(),
                color: color.to_string(),
                qty: 1,
                price,
            }),
        }
    }

    /// Applies `op`; a resulting quantity of zero or less removes the line.
    pub fn update(&mut self, slug: &str, color: &str, op: QtyUpdate) {
        let Some(idx) = self.position(slug, color) else {
            return;
        };
        let qty = match op {
            QtyUpdate::Inc => self.items[idx].qty.saturating_add(1),
            QtyUpdate::Dec => self.items[idx].qty.saturating_sub(1),
            QtyUpdate::Set(n) => n,
        };
        if qty <= 0 {
            self.items.remove(idx);
        } else {
            self.items[idx].qty = qty;
        }
    }

    pub fn remove(&mut self, slug: &str, color: &str) {
        self.items.retain(|i| !(i.slug == slug && i.color == color));
    }

    pub fn subtotal(&self) -> Decimal {
        self.items
            .iter()
            .filter(|i| i.qty > 0)
            .map(|i| i.price * Decimal::from(i.qty))
            .sum()
    }

    pub fn count(&self) -> i32 {
        self.items.iter().map(|i| i.qty.max(0)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Reads and writes the `cart` cookie.
#[derive(Clone, Debug)]
pub struct CartCodec {
    signer: TokenSigner,
    secure: bool,
}

impl CartCodec {
    pub fn new(signer: TokenSigner, secure: bool) -> Self {
        Self { signer, secure }
    }

    pub fn encode(&self, cart: &Cart) -> String {
        let payload = serde_json::to_vec(cart).unwrap_or_else(|_| br#"{"items":[]}"#.to_vec());
        self.signer.sign(&payload)
    }

    /// Any failure (bad signature, bad encoding, bad JSON) yields an empty cart.
    pub fn decode(&self, token: &str) -> Cart {
        self.signer
            .verify(token)
            .ok()
            .and_then(|payload| serde_json::from_slice::<Cart>(&payload).ok())
            .unwrap_or_default()
    }

    /// `Set-Cookie` value carrying `cart`.
    pub fn set_cookie(&self, cart: &Cart) -> String {
        self.cookie(&self.encode(cart), CART_MAX_AGE_SECS)
    }

    pub fn clear_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            CART_COOKIE, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Value of cookie `name` in a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}
