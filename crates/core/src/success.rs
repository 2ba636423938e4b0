use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{CheckoutError, CheckoutResult};
use crate::issuance::IssuanceService;
use crate::ledger::VoucherLedger;
use crate::mail::{deliver_voucher_email, Mailer};
use crate::payment::{PaidLineItem, PaidSession, PaymentGateway};
use crate::retry::with_retries;
use crate::types::{
    is_mock_session_id, DeliveryMethod, GeneratedVoucher, NewVoucher, PendingCheckout, NO_COUPON,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessOutcome {
    pub session: PaidSession,
    pub voucher_used: Option<String>,
    #[serde(rename = "voucher")]
    pub generated_voucher: Option<GeneratedVoucher>,
    pub already_processed: bool,
    /// Background email send started by this call, if any.
    #[serde(skip)]
    pub email_task: Option<JoinHandle<()>>,
}

pub struct SuccessHandler {
    gateway: Option<Arc<dyn PaymentGateway>>,
    ledger: Arc<dyn VoucherLedger>,
    issuance: IssuanceService,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl SuccessHandler {
    pub fn new(
        gateway: Option<Arc<dyn PaymentGateway>>,
        ledger: Arc<dyn VoucherLedger>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        currency: &str,
    ) -> Self {
        Self {
            issuance: IssuanceService::new(ledger.clone(), clock.clone()),
            gateway,
            ledger,
            mailer,
            clock,
            currency: currency.to_lowercase(),
        }
    }

    /// Finalize a paid checkout. Safe to call repeatedly for one session: the
    /// voucher is issued and emailed once, later calls report
    /// `already_processed`.
    pub async fn handle_successful_payment(&self, session_id: &str) -> CheckoutResult<SuccessOutcome> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(CheckoutError::Validation("session_id is required".to_string()));
        }

        let pending = self.ledger.pending_checkout(session_id).await?;
        let session = self.load_session(session_id, pending.as_ref()).await?;

        if !session.is_paid() {
            warn!(session_id, payment_status = %session.payment_status, "success page hit for unpaid session");
            return Err(CheckoutError::PaymentNotCompleted(session.payment_status));
        }

        let voucher_used = pending
            .as_ref()
            .and_then(|p| p.coupon_code.clone())
            .or_else(|| session.metadata.get("voucherUsed").cloned())
            .filter(|code| !code.is_empty() && !code.eq_ignore_ascii_case(NO_COUPON));

        if let Some(code) = voucher_used.as_deref() {
            self.record_redemption(session_id, code, &session, pending.as_ref())
                .await;
        }

        let issued = match pending.as_ref() {
            Some(pending) if pending.personalization.is_some() => {
                let new = voucher_request(pending, &session)?;
                Some(self.issuance.create_gift_voucher(new).await?)
            }
            _ => None,
        };

        let already_processed = issued.as_ref().is_some_and(|issued| !issued.created);
        let email_task = match issued.as_ref() {
            Some(issued) if issued.created && issued.voucher.email_due(self.clock.now()) => {
                Some(self.spawn_email(issued.voucher.clone()))
            }
            _ => None,
        };

        info!(
            session_id,
            coupon = voucher_used.as_deref().unwrap_or(NO_COUPON),
            voucher_issued = issued.is_some(),
            already_processed,
            "payment success handled"
        );

        Ok(SuccessOutcome {
            session,
            voucher_used,
            generated_voucher: issued.map(|issued| issued.voucher),
            already_processed,
            email_task,
        })
    }

    async fn load_session(
        &self,
        session_id: &str,
        pending: Option<&PendingCheckout>,
    ) -> CheckoutResult<PaidSession> {
        if is_mock_session_id(session_id) {
            return match pending {
                Some(pending) => Ok(mock_paid_session(pending, &self.currency)),
                None => Err(CheckoutError::NotFound(format!("checkout session {}", session_id))),
            };
        }

        let gateway = self.gateway.as_deref().ok_or_else(|| {
            CheckoutError::Validation("payment provider is not configured".to_string())
        })?;
        with_retries("retrieve_checkout_session", move || {
            gateway.retrieve_session(session_id)
        })
        .await
        .inspect_err(|err| error!(session_id, error = %err, "could not retrieve checkout session"))
    }

    async fn record_redemption(
        &self,
        session_id: &str,
        code: &str,
        session: &PaidSession,
        pending: Option<&PendingCheckout>,
    ) {
        let email = pending
            .and_then(|p| p.customer_email.as_deref())
            .or(session.customer_email.as_deref());
        match self
            .ledger
            .record_coupon_redemption(session_id, code, email, self.clock.now())
            .await
        {
            Ok(true) => info!(session_id, coupon = code, "coupon redemption recorded"),
            Ok(false) => debug!(session_id, coupon = code, "coupon redemption already recorded"),
            Err(err) => warn!(session_id, coupon = code, error = %err, "failed to record coupon redemption"),
        }
    }

    fn spawn_email(&self, voucher: GeneratedVoucher) -> JoinHandle<()> {
        let mailer = self.mailer.clone();
        let ledger = self.ledger.clone();
        let clock = self.clock.clone();
        let currency = self.currency.clone();
        tokio::spawn(async move {
            if let Err(err) =
                deliver_voucher_email(mailer.as_ref(), ledger.as_ref(), clock.as_ref(), &voucher, &currency)
                    .await
            {
                error!(
                    session_id = %voucher.session_id,
                    security_code = %voucher.security_code,
                    error = %err,
                    "voucher email failed, left for the delivery worker"
                );
            }
        })
    }
}

fn voucher_request(pending: &PendingCheckout, session: &PaidSession) -> CheckoutResult<NewVoucher> {
    let personalization = pending.personalization.clone().unwrap_or_default();
    let recipient_email = personalization
        .recipient_email
        .clone()
        .or_else(|| pending.customer_email.clone())
        .or_else(|| session.customer_email.clone())
        .ok_or_else(|| CheckoutError::Validation("recipient email is required".to_string()))?;
    let amount_cents = if pending.face_value_cents > 0 {
        pending.face_value_cents
    } else {
        session.amount_total_cents.unwrap_or_default()
    };
    let voucher_type = personalization
        .voucher_type
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| pending.line_items.first().map(|item| item.sku.clone()))
        .unwrap_or_else(|| "Gutschein".to_string());
    // the address the buyer typed wins over the one the provider collected
    let shipping_address = match personalization.delivery_method {
        DeliveryMethod::Post => personalization
            .shipping_address
            .or_else(|| session.shipping_address.clone()),
        DeliveryMethod::Email => None,
    };

    Ok(NewVoucher {
        session_id: pending.session_id.clone(),
        recipient_email,
        recipient_name: personalization.recipient_name,
        amount_cents,
        voucher_type,
        message: personalization.message,
        delivery_method: personalization.delivery_method,
        delivery_date: personalization.delivery_date,
        sender_name: personalization.sender_name,
        sender_email: personalization.sender_email,
        photo_url: personalization.photo_url,
        shipping_address,
    })
}

/// What the provider would report for a simulated checkout.
fn mock_paid_session(pending: &PendingCheckout, currency: &str) -> PaidSession {
    let mut metadata = HashMap::new();
    metadata.insert(
        "voucherUsed".to_string(),
        pending
            .coupon_code
            .clone()
            .unwrap_or_else(|| NO_COUPON.to_string()),
    );
    PaidSession {
        id: pending.session_id.clone(),
        payment_status: "paid".to_string(),
        customer_email: pending.customer_email.clone(),
        amount_total_cents: Some(pending.amount_total_cents),
        currency: Some(currency.to_string()),
        metadata,
        line_items: pending
            .line_items
            .iter()
            .map(|item| PaidLineItem {
                description: item.name.clone(),
                quantity: item.quantity,
                amount_total_cents: item.total_cents(),
            })
            .collect(),
        shipping_address: pending
            .personalization
            .as_ref()
            .and_then(|p| p.shipping_address.clone()),
    }
}
