use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use validator::Validate;

use crate::clock::Clock;
use crate::coupons::{Coupon, CouponResolver};
use crate::error::{invalid_fields, CheckoutError, CheckoutResult};
use crate::ledger::VoucherLedger;
use crate::payment::{CreateSessionParams, PaymentGateway};
use crate::pricing::{price_cart, ProductCatalog};
use crate::retry::with_retries;
use crate::types::{
    CartLineItem, DeliveryMethod, PendingCheckout, VoucherPersonalization, MOCK_SESSION_PREFIX,
    NO_COUPON,
};

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(max = 50))]
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub coupon_code: Option<String>,
    #[serde(default)]
    #[validate(email)]
    pub customer_email: Option<String>,
    #[serde(default)]
    #[validate]
    pub personalization: Option<VoucherPersonalization>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
    pub mock: bool,
}

pub struct CheckoutService {
    coupons: Arc<CouponResolver>,
    catalog: ProductCatalog,
    gateway: Option<Arc<dyn PaymentGateway>>,
    ledger: Arc<dyn VoucherLedger>,
    clock: Arc<dyn Clock>,
    public_url: String,
    currency: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coupons: Arc<CouponResolver>,
        catalog: ProductCatalog,
        gateway: Option<Arc<dyn PaymentGateway>>,
        ledger: Arc<dyn VoucherLedger>,
        clock: Arc<dyn Clock>,
        public_url: &str,
        currency: &str,
    ) -> Self {
        Self {
            coupons,
            catalog,
            gateway,
            ledger,
            clock,
            public_url: public_url.trim_end_matches('/').to_string(),
            currency: currency.to_lowercase(),
        }
    }

    /// True when no payment provider is configured and sessions are simulated.
    pub fn is_mock(&self) -> bool {
        self.gateway.is_none()
    }

    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> CheckoutResult<CheckoutSession> {
        let request = normalize_request(request);
        validate_request(&request)?;

        let customer_email = request.customer_email;
        let personalization = request
            .personalization
            .map(|p| with_recipient(p, customer_email.as_deref()))
            .transpose()?;

        let coupon = self.resolve_coupon(request.coupon_code.as_deref()).await;
        let priced = price_cart(&request.items, &self.catalog, coupon.as_ref())?;
        if personalization.is_some() && priced.subtotal_cents <= 0 {
            return Err(CheckoutError::Validation(
                "voucher value must be positive".to_string(),
            ));
        }
        let voucher_used = priced
            .applied_coupon
            .clone()
            .unwrap_or_else(|| NO_COUPON.to_string());

        let (session_id, url, mock) = match self.gateway.as_deref() {
            Some(gateway) => {
                let params = CreateSessionParams {
                    checkout_ref: format!("chk_{}", nanoid::nanoid!(16)),
                    line_items: priced.items.clone(),
                    voucher_used: voucher_used.clone(),
                    customer_email: customer_email.clone(),
                    collect_shipping: personalization
                        .as_ref()
                        .is_some_and(|p| p.delivery_method == DeliveryMethod::Post),
                    success_url: format!(
                        "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                        self.public_url
                    ),
                    cancel_url: format!("{}/cart", self.public_url),
                    currency: self.currency.clone(),
                };
                let params = &params;
                let session =
                    with_retries("create_checkout_session", move || gateway.create_session(params))
                        .await
                        .inspect_err(|err| {
                            error!(error = %err, "payment provider rejected checkout session")
                        })?;
                (session.id, session.url, false)
            }
            None => {
                let session_id = format!("{}{}", MOCK_SESSION_PREFIX, nanoid::nanoid!(16));
                let url = format!(
                    "{}/checkout/success?session_id={}",
                    self.public_url, session_id
                );
                (session_id, url, true)
            }
        };

        let pending = PendingCheckout {
            session_id: session_id.clone(),
            coupon_code: priced.applied_coupon.clone(),
            customer_email,
            personalization,
            line_items: priced.items,
            face_value_cents: priced.subtotal_cents,
            amount_total_cents: priced.total_cents,
            mock,
            created_at: self.clock.now(),
        };
        self.ledger.save_pending_checkout(&pending).await?;

        info!(
            session_id = %session_id,
            coupon = %voucher_used,
            amount_total_cents = pending.amount_total_cents,
            mock,
            "checkout session created"
        );

        Ok(CheckoutSession {
            session_id,
            url,
            mock,
        })
    }

    async fn resolve_coupon(&self, code: Option<&str>) -> Option<Coupon> {
        let code = code
            .map(str::trim)
            .filter(|code| !code.is_empty() && !code.eq_ignore_ascii_case(NO_COUPON))?;

        match self.coupons.find_coupon(code).await {
            Some(coupon) if self.coupons.is_active(&coupon) => Some(coupon),
            Some(coupon) => {
                info!(coupon = %coupon.code, "coupon outside its validity window");
                None
            }
            None => {
                info!(coupon = %code, "unknown coupon code");
                None
            }
        }
    }
}

/// Trim free-text fields so blank values count as missing.
fn normalize_request(mut request: CheckoutRequest) -> CheckoutRequest {
    for item in &mut request.items {
        item.sku = item.sku.trim().to_string();
        item.name = item.name.trim().to_string();
    }
    request.customer_email = trimmed(request.customer_email);
    if let Some(personalization) = request.personalization.as_mut() {
        personalization.recipient_email = trimmed(personalization.recipient_email.take());
        personalization.sender_email = trimmed(personalization.sender_email.take());
    }
    request
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_request(request: &CheckoutRequest) -> CheckoutResult<()> {
    if request.items.is_empty() {
        return Err(CheckoutError::Validation("cart is empty".to_string()));
    }
    request.validate()?;
    for (i, item) in request.items.iter().enumerate() {
        item.validate().map_err(|errors| {
            CheckoutError::Validation(format!("item {}: {}", i, invalid_fields(&errors)))
        })?;
    }
    Ok(())
}

/// The recipient falls back to the buyer; one of the two must be present.
fn with_recipient(
    mut personalization: VoucherPersonalization,
    customer_email: Option<&str>,
) -> CheckoutResult<VoucherPersonalization> {
    if personalization.recipient_email.is_none() {
        personalization.recipient_email = customer_email
            .map(str::to_string)
            .ok_or_else(|| CheckoutError::Validation("recipient email is required".to_string()))
            .map(Some)?;
    }
    Ok(personalization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coupons::StaticCouponSource;
    use crate::ledger::MemoryLedger;
    use crate::payment::testing::FakeGateway;
    use crate::types::MAX_AMOUNT_CENTS;
    use chrono::{Duration, TimeZone, Utc};

    const COUPONS: &str = r#"[
        {"code": "VCWIEN", "type": "percentage", "value": 20, "skus": ["Family-Basic", "Family-Premium"]},
        {"code": "SUMMER", "type": "fixed", "value": 1500, "skus": ["Newborn-Basic"],
         "startsAt": "2027-06-01T00:00:00Z", "endsAt": "2027-09-01T00:00:00Z"}
    ]"#;

    struct Fixture {
        service: CheckoutService,
        gateway: Arc<FakeGateway>,
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture(with_gateway: bool) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 12, 1, 10, 0, 0).unwrap(),
        ));
        let coupons = Arc::new(CouponResolver::new(
            Arc::new(StaticCouponSource::new(Some(COUPONS.to_string()))),
            clock.clone(),
            60,
        ));
        let gateway = Arc::new(FakeGateway::default());
        let ledger = Arc::new(MemoryLedger::new());
        let service = CheckoutService::new(
            coupons,
            ProductCatalog::default(),
            with_gateway.then(|| gateway.clone() as Arc<dyn PaymentGateway>),
            ledger.clone(),
            clock.clone(),
            "http://localhost:3000/",
            "EUR",
        );
        Fixture {
            service,
            gateway,
            ledger,
            clock,
        }
    }

    fn item(sku: &str, price: i64) -> CartLineItem {
        CartLineItem {
            sku: sku.to_string(),
            name: format!("{} Shooting", sku),
            unit_price_cents: price,
            quantity: 1,
        }
    }

    fn request(items: Vec<CartLineItem>, coupon: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            items,
            coupon_code: coupon.map(str::to_string),
            customer_email: Some("buyer@example.at".to_string()),
            personalization: None,
        }
    }

    #[tokio::test]
    async fn test_discount_is_computed_server_side() {
        let fx = fixture(true);
        let session = fx
            .service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], Some("vcwien")))
            .await
            .unwrap();

        assert!(!session.mock);
        let params = fx.gateway.last_created().unwrap();
        assert_eq!(params.line_items[0].unit_amount_cents, 7600);
        assert_eq!(params.voucher_used, "VCWIEN");
        assert_eq!(params.currency, "eur");
        assert_eq!(
            params.success_url,
            "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );

        let pending = fx
            .ledger
            .pending_checkout(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.coupon_code.as_deref(), Some("VCWIEN"));
        assert_eq!(pending.face_value_cents, 9500);
        assert_eq!(pending.amount_total_cents, 7600);
    }

    #[tokio::test]
    async fn test_unknown_coupon_means_none() {
        let fx = fixture(true);
        fx.service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], Some("NOPE")))
            .await
            .unwrap();
        let params = fx.gateway.last_created().unwrap();
        assert_eq!(params.voucher_used, NO_COUPON);
        assert_eq!(params.line_items[0].unit_amount_cents, 9500);
    }

    #[tokio::test]
    async fn test_inactive_coupon_is_ignored_until_window_opens() {
        let fx = fixture(true);
        fx.service
            .create_checkout_session(request(vec![item("Newborn-Basic", 12900)], Some("SUMMER")))
            .await
            .unwrap();
        assert_eq!(fx.gateway.last_created().unwrap().line_items[0].unit_amount_cents, 12900);

        fx.clock.set(Utc.with_ymd_and_hms(2027, 7, 1, 0, 0, 0).unwrap());
        fx.service
            .create_checkout_session(request(vec![item("Newborn-Basic", 12900)], Some("SUMMER")))
            .await
            .unwrap();
        assert_eq!(fx.gateway.last_created().unwrap().line_items[0].unit_amount_cents, 11400);
    }

    #[tokio::test]
    async fn test_empty_cart_creates_no_session() {
        let fx = fixture(true);
        let result = fx.service.create_checkout_session(request(vec![], None)).await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
        assert_eq!(fx.gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn test_item_validation() {
        let fx = fixture(true);
        let cases = [
            CartLineItem { sku: " ".to_string(), ..item("X", 100) },
            CartLineItem { name: String::new(), ..item("X", 100) },
            CartLineItem { quantity: 0, ..item("X", 100) },
            CartLineItem { quantity: 101, ..item("X", 100) },
            item("X", -1),
            item("X", MAX_AMOUNT_CENTS + 1),
        ];
        for bad in cases {
            let result = fx.service.create_checkout_session(request(vec![bad], None)).await;
            assert!(matches!(result, Err(CheckoutError::Validation(_))));
        }
        assert_eq!(fx.gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn test_huge_amounts_are_rejected_without_panicking() {
        let fx = fixture(false);
        let huge = CartLineItem {
            quantity: 2,
            ..item("Family-Basic", i64::MAX / 2 + 1)
        };
        let result = fx.service.create_checkout_session(request(vec![huge], None)).await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));

        let items = vec![
            CartLineItem { quantity: 100, ..item("Family-Basic", MAX_AMOUNT_CENTS) },
        ];
        let result = fx.service.create_checkout_session(request(items, None)).await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
    }

    #[tokio::test]
    async fn test_zero_value_voucher_cart_is_rejected() {
        let fx = fixture(true);
        let mut req = request(vec![item("Family-Basic", 0)], None);
        req.personalization = Some(VoucherPersonalization {
            recipient_email: Some("anna@example.at".to_string()),
            ..Default::default()
        });
        let result = fx.service.create_checkout_session(req).await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
        assert_eq!(fx.gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_emails_count_as_missing() {
        let fx = fixture(false);
        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.customer_email = Some("  buyer@example.at ".to_string());
        req.personalization = Some(VoucherPersonalization {
            recipient_email: Some("   ".to_string()),
            ..Default::default()
        });
        let session = fx.service.create_checkout_session(req).await.unwrap();
        let pending = fx
            .ledger
            .pending_checkout(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.customer_email.as_deref(), Some("buyer@example.at"));
        assert_eq!(
            pending.personalization.unwrap().recipient_email.as_deref(),
            Some("buyer@example.at")
        );
    }

    #[tokio::test]
    async fn test_personalization_requires_some_recipient() {
        let fx = fixture(true);
        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.customer_email = None;
        req.personalization = Some(VoucherPersonalization::default());
        let result = fx.service.create_checkout_session(req).await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
    }

    #[tokio::test]
    async fn test_recipient_falls_back_to_customer() {
        let fx = fixture(false);
        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.personalization = Some(VoucherPersonalization {
            recipient_name: Some("Anna".to_string()),
            ..Default::default()
        });
        let session = fx.service.create_checkout_session(req).await.unwrap();
        let pending = fx
            .ledger
            .pending_checkout(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        let personalization = pending.personalization.unwrap();
        assert_eq!(personalization.recipient_email.as_deref(), Some("buyer@example.at"));
    }

    #[tokio::test]
    async fn test_malformed_emails_rejected() {
        let fx = fixture(true);
        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.customer_email = Some("buyer-at-example".to_string());
        assert!(matches!(
            fx.service.create_checkout_session(req).await,
            Err(CheckoutError::Validation(_))
        ));

        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.personalization = Some(VoucherPersonalization {
            recipient_email: Some("anna@".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            fx.service.create_checkout_session(req).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_mode_without_gateway() {
        let fx = fixture(false);
        let session = fx
            .service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], Some("VCWIEN")))
            .await
            .unwrap();

        assert!(session.mock);
        assert!(session.session_id.starts_with(MOCK_SESSION_PREFIX));
        assert_eq!(
            session.url,
            format!(
                "http://localhost:3000/checkout/success?session_id={}",
                session.session_id
            )
        );
        let pending = fx
            .ledger
            .pending_checkout(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(pending.mock);
        assert_eq!(pending.amount_total_cents, 7600);
    }

    #[tokio::test]
    async fn test_post_delivery_collects_shipping() {
        let fx = fixture(true);
        let mut req = request(vec![item("Family-Basic", 9500)], None);
        req.personalization = Some(VoucherPersonalization {
            delivery_method: DeliveryMethod::Post,
            ..Default::default()
        });
        fx.service.create_checkout_session(req).await.unwrap();
        assert!(fx.gateway.last_created().unwrap().collect_shipping);
    }

    #[tokio::test]
    async fn test_provider_rejection_is_not_retried() {
        let fx = fixture(true);
        fx.gateway
            .fail_next_create(CheckoutError::provider(Some(400), "amount_too_small"));
        let result = fx
            .service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], None))
            .await;

        match result {
            Err(CheckoutError::PaymentProvider { status, message }) => {
                assert_eq!(status, Some(400));
                assert_eq!(message, "amount_too_small");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
        assert_eq!(fx.gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_provider_failure_is_retried() {
        let fx = fixture(true);
        fx.gateway.fail_next_create(CheckoutError::provider(Some(502), "bad gateway"));
        let session = fx
            .service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], None))
            .await
            .unwrap();
        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(fx.gateway.created_count(), 1);

        // both attempts carry one checkout ref, so the idempotency key matches
        let refs = fx.gateway.attempted_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], refs[1]);
        assert!(refs[0].starts_with("chk_"));
    }

    #[tokio::test]
    async fn test_clock_is_recorded_on_pending_checkout() {
        let fx = fixture(false);
        fx.clock.advance(Duration::minutes(3));
        let session = fx
            .service
            .create_checkout_session(request(vec![item("Family-Basic", 9500)], None))
            .await
            .unwrap();
        let pending = fx
            .ledger
            .pending_checkout(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.created_at, fx.clock.now());
    }
}
