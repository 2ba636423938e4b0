use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{build_secure_link, verify_download, SecureLink};
use crate::clock::Clock;
use crate::document::render_voucher_html;
use crate::error::{CheckoutError, CheckoutResult};
use crate::ledger::VoucherLedger;
use crate::types::{DeliveryMethod, GeneratedVoucher};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedVoucher {
    pub voucher: GeneratedVoucher,
    #[serde(skip)]
    pub html: String,
}

/// Admin operations over issued vouchers, plus the customer download behind
/// signed links.
pub struct FulfillmentService {
    ledger: Arc<dyn VoucherLedger>,
    clock: Arc<dyn Clock>,
    link_secret: String,
    public_url: String,
    currency: String,
}

impl FulfillmentService {
    pub fn new(
        ledger: Arc<dyn VoucherLedger>,
        clock: Arc<dyn Clock>,
        link_secret: &str,
        public_url: &str,
        currency: &str,
    ) -> Self {
        Self {
            ledger,
            clock,
            link_secret: link_secret.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            currency: currency.to_lowercase(),
        }
    }

    pub async fn print_queue(&self) -> CheckoutResult<Vec<GeneratedVoucher>> {
        self.ledger.print_queue().await
    }

    /// Re-render the voucher document. Status and security code stay as they are.
    pub async fn regenerate_document(&self, session_id: &str) -> CheckoutResult<RenderedVoucher> {
        let voucher = self
            .ledger
            .touch_document(session_id, self.clock.now())
            .await?
            .ok_or_else(|| voucher_not_found(session_id))?;
        info!(session_id, security_code = %voucher.security_code, "voucher document regenerated");
        Ok(self.render(voucher))
    }

    pub async fn mark_fulfilled(&self, session_id: &str) -> CheckoutResult<GeneratedVoucher> {
        let voucher = self
            .ledger
            .voucher_by_session(session_id)
            .await?
            .ok_or_else(|| voucher_not_found(session_id))?;
        if voucher.delivery_method == DeliveryMethod::Email {
            return Err(CheckoutError::Validation(
                "email vouchers are not fulfilled by post".to_string(),
            ));
        }

        let fulfilled = self
            .ledger
            .mark_fulfilled(session_id, self.clock.now())
            .await?
            .ok_or_else(|| voucher_not_found(session_id))?;
        info!(session_id, security_code = %fulfilled.security_code, "voucher marked fulfilled");
        Ok(fulfilled)
    }

    pub async fn secure_link(&self, session_id: &str, ttl_secs: Option<i64>) -> CheckoutResult<SecureLink> {
        if self
            .ledger
            .voucher_by_session(session_id)
            .await?
            .is_none()
        {
            return Err(voucher_not_found(session_id));
        }
        build_secure_link(
            &self.public_url,
            &self.link_secret,
            session_id,
            self.clock.now(),
            ttl_secs,
        )
        .map_err(|err| CheckoutError::Validation(format!("public url is invalid: {}", err)))
    }

    pub async fn coupon_usage(&self, code: &str, customer_email: Option<&str>) -> CheckoutResult<i64> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CheckoutError::Validation("coupon code is required".to_string()));
        }
        self.ledger.coupon_usage_count(code, customer_email).await
    }

    /// The voucher behind a signed download link.
    pub async fn resolve_download(
        &self,
        session_id: &str,
        expires: i64,
        signature: &str,
    ) -> CheckoutResult<RenderedVoucher> {
        if !verify_download(&self.link_secret, session_id, expires, signature, self.clock.now()) {
            warn!(session_id, expires, "rejected voucher download link");
            return Err(CheckoutError::InvalidLink);
        }
        let voucher = self
            .ledger
            .voucher_by_session(session_id)
            .await?
            .ok_or_else(|| voucher_not_found(session_id))?;
        Ok(self.render(voucher))
    }

    fn render(&self, voucher: GeneratedVoucher) -> RenderedVoucher {
        let html = render_voucher_html(&voucher, &self.currency);
        RenderedVoucher { voucher, html }
    }
}

fn voucher_not_found(session_id: &str) -> CheckoutError {
    CheckoutError::NotFound(format!("voucher for session {}", session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryLedger;
    use crate::types::{NewVoucher, VoucherStatus};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use url::Url;

    struct Fixture {
        service: FulfillmentService,
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 12, 1, 10, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(MemoryLedger::new());
        Fixture {
            service: FulfillmentService::new(
                ledger.clone(),
                clock.clone(),
                "link-secret",
                "http://localhost:3000",
                "eur",
            ),
            ledger,
            clock,
        }
    }

    async fn issue(fx: &Fixture, session_id: &str, method: DeliveryMethod) -> GeneratedVoucher {
        let new = NewVoucher {
            session_id: session_id.to_string(),
            recipient_email: "anna@example.at".to_string(),
            recipient_name: Some("Anna".to_string()),
            amount_cents: 9500,
            voucher_type: "Family-Basic".to_string(),
            message: None,
            delivery_method: method,
            delivery_date: None,
            sender_name: None,
            sender_email: None,
            photo_url: None,
            shipping_address: None,
        };
        fx.ledger.insert_voucher(&new, fx.clock.now()).await.unwrap().0
    }

    fn link_params(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn test_regenerate_keeps_code_and_status() {
        let fx = fixture();
        let issued = issue(&fx, "cs_1", DeliveryMethod::Post).await;
        fx.clock.advance(Duration::hours(1));

        let rendered = fx.service.regenerate_document("cs_1").await.unwrap();
        assert_eq!(rendered.voucher.security_code, issued.security_code);
        assert_eq!(rendered.voucher.status, VoucherStatus::Issued);
        assert_eq!(rendered.voucher.document_rendered_at, fx.clock.now());
        assert!(rendered.html.contains(&issued.security_code));
    }

    #[tokio::test]
    async fn test_regenerate_unknown_session() {
        let fx = fixture();
        assert!(matches!(
            fx.service.regenerate_document("cs_missing").await,
            Err(CheckoutError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_fulfilled_removes_from_queue() {
        let fx = fixture();
        issue(&fx, "cs_1", DeliveryMethod::Post).await;
        assert_eq!(fx.service.print_queue().await.unwrap().len(), 1);

        let fulfilled = fx.service.mark_fulfilled("cs_1").await.unwrap();
        assert_eq!(fulfilled.status, VoucherStatus::Fulfilled);
        assert!(fx.service.print_queue().await.unwrap().is_empty());

        let again = fx.service.mark_fulfilled("cs_1").await.unwrap();
        assert_eq!(again.fulfilled_at, fulfilled.fulfilled_at);
    }

    #[tokio::test]
    async fn test_email_vouchers_cannot_be_fulfilled() {
        let fx = fixture();
        issue(&fx, "cs_1", DeliveryMethod::Email).await;
        assert!(matches!(
            fx.service.mark_fulfilled("cs_1").await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_secure_link_resolves_until_expiry() {
        let fx = fixture();
        issue(&fx, "cs_1", DeliveryMethod::Post).await;
        let link = fx.service.secure_link("cs_1", Some(600)).await.unwrap();
        let params = link_params(&link.url);
        let expires: i64 = params["expires"].parse().unwrap();

        let rendered = fx
            .service
            .resolve_download("cs_1", expires, &params["sig"])
            .await
            .unwrap();
        assert_eq!(rendered.voucher.session_id, "cs_1");

        fx.clock.advance(Duration::seconds(600));
        assert!(matches!(
            fx.service.resolve_download("cs_1", expires, &params["sig"]).await,
            Err(CheckoutError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_secure_link_does_not_open_other_sessions() {
        let fx = fixture();
        issue(&fx, "cs_1", DeliveryMethod::Post).await;
        issue(&fx, "cs_2", DeliveryMethod::Post).await;
        let link = fx.service.secure_link("cs_1", None).await.unwrap();
        let params = link_params(&link.url);
        let expires: i64 = params["expires"].parse().unwrap();

        assert!(matches!(
            fx.service.resolve_download("cs_2", expires, &params["sig"]).await,
            Err(CheckoutError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_coupon_usage() {
        let fx = fixture();
        fx.ledger
            .record_coupon_redemption("cs_1", "VCWIEN", Some("anna@example.at"), fx.clock.now())
            .await
            .unwrap();
        assert_eq!(fx.service.coupon_usage("vcwien", None).await.unwrap(), 1);
        assert_eq!(
            fx.service
                .coupon_usage("VCWIEN", Some("ben@example.at"))
                .await
                .unwrap(),
            0
        );
        assert!(matches!(
            fx.service.coupon_usage(" ", None).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_secure_link_requires_voucher() {
        let fx = fixture();
        assert!(matches!(
            fx.service.secure_link("cs_missing", None).await,
            Err(CheckoutError::NotFound(_))
        ));
    }
}
