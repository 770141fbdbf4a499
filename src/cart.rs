//! Cookie-backed shopping cart. The cart is purely client state — a map of
//! product id to quantity serialized into one cookie — priced against the
//! catalog on every render so stale entries just drop out.

use std::collections::BTreeMap;

use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::HttpRequest;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::models::ProductRow;

pub const CART_COOKIE: &str = "lumea_cart";
const MAX_LINE_QUANTITY: i64 = 99;

pub const FLAT_SHIPPING_CENTS: i64 = 595;
pub const FREE_SHIPPING_THRESHOLD_CENTS: i64 = 7500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    pub lines: BTreeMap<String, i64>,
}

impl Cart {
    pub fn from_request(req: &HttpRequest) -> Self {
        req.cookie(CART_COOKIE)
            .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
            .unwrap_or_default()
    }

    pub fn to_cookie(&self) -> Cookie<'static> {
        let value = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Cookie::build(CART_COOKIE, value)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(Duration::days(30))
            .finish()
    }

    pub fn cleared() -> Cookie<'static> {
        Cookie::build(CART_COOKIE, "")
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(Duration::seconds(0))
            .finish()
    }

    pub fn add(&mut self, product_id: &str, quantity: i64) {
        let entry = self.lines.entry(product_id.to_string()).or_insert(0);
        *entry = (*entry + quantity).clamp(0, MAX_LINE_QUANTITY);
        if *entry == 0 {
            self.lines.remove(product_id);
        }
    }

    /// Set an absolute quantity; zero or less removes the line.
    pub fn set_quantity(&mut self, product_id: &str, quantity: i64) {
        if quantity <= 0 {
            self.lines.remove(product_id);
        } else {
            self.lines
                .insert(product_id.to_string(), quantity.min(MAX_LINE_QUANTITY));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> i64 {
        self.lines.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: ProductRow,
    pub quantity: i64,
    pub line_total_cents: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CartTotals {
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
}

pub fn shipping_for(subtotal_cents: i64) -> i64 {
    if subtotal_cents >= FREE_SHIPPING_THRESHOLD_CENTS {
        0
    } else {
        FLAT_SHIPPING_CENTS
    }
}

/// Price the cart against the catalog. Products that have been removed or
/// deactivated since the cookie was written are silently skipped.
pub async fn priced_lines(pool: &SqlitePool, cart: &Cart) -> Result<Vec<PricedLine>, sqlx::Error> {
    let mut lines = Vec::new();
    for (product_id, quantity) in &cart.lines {
        let product = sqlx::query_as::<_, ProductRow>(
            r#"SELECT id, category_id, name, description, price_cents, stock, active
               FROM products WHERE id = ? AND active = 1 LIMIT 1"#,
        )
        .bind(product_id)
        .fetch_optional(pool)
        .await?;

        if let Some(product) = product {
            let quantity = (*quantity).clamp(1, MAX_LINE_QUANTITY);
            lines.push(PricedLine {
                line_total_cents: product.price_cents * quantity,
                product,
                quantity,
            });
        }
    }
    Ok(lines)
}

pub fn totals(lines: &[PricedLine]) -> CartTotals {
    let subtotal_cents: i64 = lines.iter().map(|line| line.line_total_cents).sum();
    let shipping_cents = if lines.is_empty() {
        0
    } else {
        shipping_for(subtotal_cents)
    };
    CartTotals {
        subtotal_cents,
        shipping_cents,
        total_cents: subtotal_cents + shipping_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price_cents: i64, quantity: i64) -> PricedLine {
        PricedLine {
            product: ProductRow {
                id: "p".to_string(),
                category_id: None,
                name: "Test".to_string(),
                description: String::new(),
                price_cents,
                stock: 10,
                active: 1,
            },
            quantity,
            line_total_cents: price_cents * quantity,
        }
    }

    #[test]
    fn add_accumulates_and_clamps() {
        let mut cart = Cart::default();
        cart.add("serum", 2);
        cart.add("serum", 3);
        assert_eq!(cart.lines.get("serum"), Some(&5));

        cart.add("serum", 500);
        assert_eq!(cart.lines.get("serum"), Some(&99));

        cart.add("serum", -99);
        assert!(cart.is_empty());
    }

    #[test]
    fn set_quantity_zero_removes_the_line() {
        let mut cart = Cart::default();
        cart.set_quantity("lipstick", 3);
        assert_eq!(cart.item_count(), 3);
        cart.set_quantity("lipstick", 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn shipping_is_waived_above_the_threshold() {
        assert_eq!(shipping_for(FREE_SHIPPING_THRESHOLD_CENTS - 1), FLAT_SHIPPING_CENTS);
        assert_eq!(shipping_for(FREE_SHIPPING_THRESHOLD_CENTS), 0);
    }

    #[test]
    fn totals_add_shipping_only_for_nonempty_carts() {
        let empty = totals(&[]);
        assert_eq!(empty.total_cents, 0);

        let small = totals(&[line(2200, 1)]);
        assert_eq!(small.subtotal_cents, 2200);
        assert_eq!(small.shipping_cents, FLAT_SHIPPING_CENTS);
        assert_eq!(small.total_cents, 2200 + FLAT_SHIPPING_CENTS);

        let big = totals(&[line(3200, 2), line(2200, 1)]);
        assert_eq!(big.subtotal_cents, 8600);
        assert_eq!(big.shipping_cents, 0);
    }
}
