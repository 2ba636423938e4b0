use std::collections::HashMap;

use crate::coupons::{Coupon, CouponKind};
use crate::error::{CheckoutError, CheckoutResult};
use crate::types::{CartLineItem, PricedLineItem, MAX_AMOUNT_CENTS};

/// Server-side base prices keyed by uppercased SKU.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    prices: HashMap<String, i64>,
}

impl ProductCatalog {
    pub fn new(prices: HashMap<String, i64>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .filter(|(_, cents)| *cents >= 0)
                .map(|(sku, cents)| (sku.trim().to_uppercase(), cents))
                .collect(),
        }
    }

    /// `{"Family-Basic": 9500, ...}`
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let prices: HashMap<String, i64> = serde_json::from_str(raw)?;
        Ok(Self::new(prices))
    }

    pub fn price_for(&self, sku: &str) -> Option<i64> {
        self.prices.get(&sku.trim().to_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub items: Vec<PricedLineItem>,
    /// Sum of base prices, before any discount.
    pub subtotal_cents: i64,
    pub total_cents: i64,
    /// Set only when the coupon discounted at least one line.
    pub applied_coupon: Option<String>,
}

pub fn discounted_unit_amount(base_cents: i64, kind: CouponKind) -> i64 {
    match kind {
        CouponKind::Percentage { percent } => {
            let keep = 100 - i128::from(percent.min(100));
            // round half up; base is never negative and the result never exceeds it
            ((i128::from(base_cents) * keep + 50) / 100) as i64
        }
        CouponKind::Fixed { amount_cents } => (base_cents - amount_cents).max(0),
    }
}

/// Price a cart on the server. The coupon passed in must already be known to
/// be active; eligibility per line is decided here from the SKU allow-list and
/// the order minimum. Orders above the provider's maximum charge are rejected.
pub fn price_cart(
    items: &[CartLineItem],
    catalog: &ProductCatalog,
    coupon: Option<&Coupon>,
) -> CheckoutResult<PricedCart> {
    let bases: Vec<i64> = items
        .iter()
        .map(|item| catalog.price_for(&item.sku).unwrap_or(item.unit_price_cents))
        .collect();

    let subtotal_cents = checked_sum(
        items
            .iter()
            .zip(&bases)
            .map(|(item, base)| base.checked_mul(i64::from(item.quantity))),
    )
    .filter(|total| *total <= MAX_AMOUNT_CENTS)
    .ok_or_else(order_too_large)?;

    let coupon = coupon.filter(|coupon| coupon.meets_minimum(subtotal_cents));

    let priced: Vec<PricedLineItem> = items
        .iter()
        .zip(bases)
        .map(|(item, base)| {
            let unit = match coupon {
                Some(coupon) if coupon.allows_sku(&item.sku) => {
                    discounted_unit_amount(base, coupon.kind)
                }
                _ => base,
            };
            PricedLineItem {
                sku: item.sku.trim().to_string(),
                name: item.name.trim().to_string(),
                base_unit_cents: base,
                unit_amount_cents: unit,
                quantity: item.quantity,
                discounted: unit != base,
            }
        })
        .collect();

    let total_cents = checked_sum(priced.iter().map(|item| {
        item.unit_amount_cents
            .checked_mul(i64::from(item.quantity))
    }))
    .ok_or_else(order_too_large)?;
    let applied_coupon = match coupon {
        Some(coupon) if priced.iter().any(|item| item.discounted) => Some(coupon.code.clone()),
        _ => None,
    };

    Ok(PricedCart {
        items: priced,
        subtotal_cents,
        total_cents,
        applied_coupon,
    })
}

fn checked_sum(amounts: impl Iterator<Item = Option<i64>>) -> Option<i64> {
    amounts.fold(Some(0i64), |acc, amount| acc?.checked_add(amount?))
}

fn order_too_large() -> CheckoutError {
    CheckoutError::Validation(format!(
        "order total exceeds the maximum of {} cents",
        MAX_AMOUNT_CENTS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupons::fallback_coupon;
    use std::collections::HashSet;

    fn item(sku: &str, price: i64, qty: u32) -> CartLineItem {
        CartLineItem {
            sku: sku.to_string(),
            name: format!("{} Shooting", sku),
            unit_price_cents: price,
            quantity: qty,
        }
    }

    fn coupon(kind: CouponKind, skus: &[&str]) -> Coupon {
        Coupon {
            code: "TEST".to_string(),
            kind,
            allowed_skus: skus.iter().map(|s| s.to_uppercase()).collect::<HashSet<_>>(),
            starts_at: None,
            ends_at: None,
            min_order_cents: None,
        }
    }

    #[test]
    fn test_percentage_discount_rounding() {
        let pct = |p| CouponKind::Percentage { percent: p };
        assert_eq!(discounted_unit_amount(9500, pct(20)), 7600);
        assert_eq!(discounted_unit_amount(999, pct(15)), 849); // 849.15
        assert_eq!(discounted_unit_amount(1001, pct(50)), 501); // 500.5 rounds up
        assert_eq!(discounted_unit_amount(100, pct(100)), 0);
        assert_eq!(discounted_unit_amount(0, pct(30)), 0);
    }

    #[test]
    fn test_fixed_discount_never_negative() {
        let fixed = |c| CouponKind::Fixed { amount_cents: c };
        assert_eq!(discounted_unit_amount(9500, fixed(1000)), 8500);
        assert_eq!(discounted_unit_amount(500, fixed(1000)), 0);
    }

    #[test]
    fn test_family_basic_with_vcwien() {
        let cart = [item("Family-Basic", 9500, 1)];
        let coupon = coupon(CouponKind::Percentage { percent: 20 }, &["Family-Basic"]);

        let priced = price_cart(&cart, &ProductCatalog::default(), Some(&coupon)).unwrap();
        assert_eq!(priced.items[0].unit_amount_cents, 7600);
        assert!(priced.items[0].discounted);
        assert_eq!(priced.subtotal_cents, 9500);
        assert_eq!(priced.total_cents, 7600);
        assert_eq!(priced.applied_coupon.as_deref(), Some("TEST"));
    }

    #[test]
    fn test_only_allowed_skus_are_discounted() {
        let cart = [item("Family-Basic", 9500, 2), item("Newborn-Premium", 19900, 1)];
        let priced = price_cart(&cart, &ProductCatalog::default(), Some(&fallback_coupon())).unwrap();

        assert_eq!(priced.items[0].unit_amount_cents, 7600);
        assert_eq!(priced.items[1].unit_amount_cents, 19900);
        assert!(!priced.items[1].discounted);
        assert_eq!(priced.total_cents, 2 * 7600 + 19900);
    }

    #[test]
    fn test_no_matching_sku_means_no_coupon_applied() {
        let cart = [item("Newborn-Basic", 12900, 1)];
        let priced = price_cart(&cart, &ProductCatalog::default(), Some(&fallback_coupon())).unwrap();
        assert_eq!(priced.total_cents, 12900);
        assert!(priced.applied_coupon.is_none());
    }

    #[test]
    fn test_catalog_price_overrides_client_price() {
        let catalog = ProductCatalog::from_json(r#"{"family-basic": 9500}"#).unwrap();
        // client pretends the item already costs 7600
        let cart = [item("Family-Basic", 7600, 1)];
        let coupon = coupon(CouponKind::Percentage { percent: 20 }, &["Family-Basic"]);

        let priced = price_cart(&cart, &catalog, Some(&coupon)).unwrap();
        assert_eq!(priced.items[0].base_unit_cents, 9500);
        assert_eq!(priced.items[0].unit_amount_cents, 7600);
    }

    #[test]
    fn test_minimum_order_amount() {
        let mut min_coupon = coupon(CouponKind::Fixed { amount_cents: 1000 }, &[]);
        min_coupon.min_order_cents = Some(10000);

        let small = price_cart(&[item("Mini", 5000, 1)], &ProductCatalog::default(), Some(&min_coupon)).unwrap();
        assert_eq!(small.total_cents, 5000);
        assert!(small.applied_coupon.is_none());

        let large = price_cart(&[item("Mini", 5000, 2)], &ProductCatalog::default(), Some(&min_coupon)).unwrap();
        assert_eq!(large.total_cents, 8000);
        assert_eq!(large.applied_coupon.as_deref(), Some("TEST"));
    }

    #[test]
    fn test_without_coupon_prices_are_base() {
        let cart = [item("Family-Basic", 9500, 3)];
        let priced = price_cart(&cart, &ProductCatalog::default(), None).unwrap();
        assert_eq!(priced.total_cents, 28500);
        assert_eq!(priced.subtotal_cents, 28500);
        assert!(priced.applied_coupon.is_none());
    }

    #[test]
    fn test_oversized_orders_are_rejected() {
        let overflowing = [item("Family-Basic", i64::MAX / 2 + 1, 2)];
        assert!(matches!(
            price_cart(&overflowing, &ProductCatalog::default(), None),
            Err(CheckoutError::Validation(_))
        ));

        let over_limit = [item("Family-Basic", MAX_AMOUNT_CENTS, 1), item("Mini", 1, 1)];
        assert!(matches!(
            price_cart(&over_limit, &ProductCatalog::default(), None),
            Err(CheckoutError::Validation(_))
        ));

        let at_limit = [item("Family-Basic", MAX_AMOUNT_CENTS, 1)];
        let priced = price_cart(&at_limit, &ProductCatalog::default(), None).unwrap();
        assert_eq!(priced.total_cents, MAX_AMOUNT_CENTS);
    }

    #[test]
    fn test_catalog_price_cannot_overflow_discount() {
        let pct = CouponKind::Percentage { percent: 20 };
        assert_eq!(discounted_unit_amount(i64::MAX, pct), 7378697629483820646);
    }

    #[test]
    fn test_catalog_ignores_negative_prices() {
        let catalog = ProductCatalog::from_json(r#"{"A": -1, "B": 100}"#).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.price_for("b"), Some(100));
        assert_eq!(catalog.price_for("a"), None);
    }
}
