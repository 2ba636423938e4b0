use std::sync::Arc;

use voucher_core::checkout::CheckoutService;
use voucher_core::clock::Clock;
use voucher_core::config::Settings;
use voucher_core::coupons::{CouponResolver, CouponSource};
use voucher_core::fulfillment::FulfillmentService;
use voucher_core::ledger::VoucherLedger;
use voucher_core::mail::Mailer;
use voucher_core::payment::PaymentGateway;
use voucher_core::pricing::ProductCatalog;
use voucher_core::success::SuccessHandler;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub coupons: Arc<CouponResolver>,
    pub checkout: Arc<CheckoutService>,
    pub success: Arc<SuccessHandler>,
    pub fulfillment: Arc<FulfillmentService>,
    pub storage: &'static str,
}

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Collaborators the services are wired from. Kept separate so tests can
/// swap in the in-memory ledger and a fixed clock.
pub struct Backends {
    pub ledger: Arc<dyn VoucherLedger>,
    pub storage: &'static str,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub mailer: Arc<dyn Mailer>,
    pub coupon_source: Arc<dyn CouponSource>,
    pub catalog: ProductCatalog,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn build(settings: Settings, backends: Backends) -> Self {
        let coupons = Arc::new(CouponResolver::new(
            backends.coupon_source,
            backends.clock.clone(),
            settings.coupon_ttl_secs,
        ));
        let checkout = CheckoutService::new(
            coupons.clone(),
            backends.catalog,
            backends.gateway.clone(),
            backends.ledger.clone(),
            backends.clock.clone(),
            &settings.public_url,
            &settings.currency,
        );
        let success = SuccessHandler::new(
            backends.gateway,
            backends.ledger.clone(),
            backends.mailer,
            backends.clock.clone(),
            &settings.currency,
        );
        let fulfillment = FulfillmentService::new(
            backends.ledger,
            backends.clock,
            &settings.link_secret,
            &settings.public_url,
            &settings.currency,
        );

        Self {
            settings: Arc::new(settings),
            coupons,
            checkout: Arc::new(checkout),
            success: Arc::new(success),
            fulfillment: Arc::new(fulfillment),
            storage: backends.storage,
        }
    }
}
