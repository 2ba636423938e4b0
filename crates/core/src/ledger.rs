use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::CheckoutResult;
use crate::types::{
    new_voucher_id, DeliveryMethod, GeneratedVoucher, NewVoucher, PendingCheckout, VoucherStatus,
};

/// Durable storage behind checkout, issuance and fulfillment.
#[async_trait]
pub trait VoucherLedger: Send + Sync {
    async fn save_pending_checkout(&self, pending: &PendingCheckout) -> CheckoutResult<()>;

    async fn pending_checkout(&self, session_id: &str) -> CheckoutResult<Option<PendingCheckout>>;

    /// Returns false when this session already redeemed a coupon.
    async fn record_coupon_redemption(
        &self,
        session_id: &str,
        code: &str,
        customer_email: Option<&str>,
        redeemed_at: DateTime<Utc>,
    ) -> CheckoutResult<bool>;

    /// Redemptions of a code, optionally narrowed to one customer email.
    async fn coupon_usage_count(
        &self,
        code: &str,
        customer_email: Option<&str>,
    ) -> CheckoutResult<i64>;

    /// Allocates the next security code and stores the voucher in one step.
    /// When the session already has a voucher that voucher is returned with
    /// `false`.
    async fn insert_voucher(
        &self,
        voucher: &NewVoucher,
        issued_at: DateTime<Utc>,
    ) -> CheckoutResult<(GeneratedVoucher, bool)>;

    async fn voucher_by_session(&self, session_id: &str) -> CheckoutResult<Option<GeneratedVoucher>>;

    /// Postal vouchers not yet fulfilled, oldest first.
    async fn print_queue(&self) -> CheckoutResult<Vec<GeneratedVoucher>>;

    async fn touch_document(
        &self,
        session_id: &str,
        rendered_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>>;

    /// Moves an issued voucher to fulfilled. A fulfilled voucher is returned
    /// unchanged.
    async fn mark_fulfilled(
        &self,
        session_id: &str,
        fulfilled_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>>;

    /// Email vouchers never sent whose delivery date has passed and which were
    /// created before `created_before`.
    async fn due_email_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> CheckoutResult<Vec<GeneratedVoucher>>;

    async fn mark_emailed(&self, voucher_id: &str, emailed_at: DateTime<Utc>) -> CheckoutResult<()>;
}

#[derive(Default)]
struct MemoryState {
    pending: HashMap<String, PendingCheckout>,
    vouchers: Vec<GeneratedVoucher>,
    redemptions: HashMap<String, (String, Option<String>)>,
    sequence: i64,
}

/// Process-local ledger for demo runs without a database, and for tests.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoucherLedger for MemoryLedger {
    async fn save_pending_checkout(&self, pending: &PendingCheckout) -> CheckoutResult<()> {
        let mut state = self.state.lock().await;
        state
            .pending
            .insert(pending.session_id.clone(), pending.clone());
        Ok(())
    }

    async fn pending_checkout(&self, session_id: &str) -> CheckoutResult<Option<PendingCheckout>> {
        Ok(self.state.lock().await.pending.get(session_id).cloned())
    }

    async fn record_coupon_redemption(
        &self,
        session_id: &str,
        code: &str,
        customer_email: Option<&str>,
        _redeemed_at: DateTime<Utc>,
    ) -> CheckoutResult<bool> {
        let mut state = self.state.lock().await;
        if state.redemptions.contains_key(session_id) {
            return Ok(false);
        }
        state.redemptions.insert(
            session_id.to_string(),
            (code.to_uppercase(), customer_email.map(str::to_string)),
        );
        Ok(true)
    }

    async fn coupon_usage_count(
        &self,
        code: &str,
        customer_email: Option<&str>,
    ) -> CheckoutResult<i64> {
        let code = code.to_uppercase();
        let state = self.state.lock().await;
        let count = state
            .redemptions
            .values()
            .filter(|(c, _)| *c == code)
            .filter(|(_, email)| match customer_email {
                Some(wanted) => email
                    .as_deref()
                    .is_some_and(|email| email.eq_ignore_ascii_case(wanted)),
                None => true,
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_voucher(
        &self,
        voucher: &NewVoucher,
        issued_at: DateTime<Utc>,
    ) -> CheckoutResult<(GeneratedVoucher, bool)> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .vouchers
            .iter()
            .find(|v| v.session_id == voucher.session_id)
        {
            return Ok((existing.clone(), false));
        }

        state.sequence += 1;
        let generated =
            GeneratedVoucher::from_new(voucher, new_voucher_id(), state.sequence, issued_at);
        state.vouchers.push(generated.clone());
        Ok((generated, true))
    }

    async fn voucher_by_session(&self, session_id: &str) -> CheckoutResult<Option<GeneratedVoucher>> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .find(|v| v.session_id == session_id)
            .cloned())
    }

    async fn print_queue(&self) -> CheckoutResult<Vec<GeneratedVoucher>> {
        let state = self.state.lock().await;
        let mut queue: Vec<GeneratedVoucher> = state
            .vouchers
            .iter()
            .filter(|v| v.awaiting_print())
            .cloned()
            .collect();
        queue.sort_by_key(|v| (v.created_at, v.sequence_number));
        Ok(queue)
    }

    async fn touch_document(
        &self,
        session_id: &str,
        rendered_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>> {
        let mut state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter_mut()
            .find(|v| v.session_id == session_id)
            .map(|v| {
                v.document_rendered_at = rendered_at;
                v.clone()
            }))
    }

    async fn mark_fulfilled(
        &self,
        session_id: &str,
        fulfilled_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>> {
        let mut state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter_mut()
            .find(|v| v.session_id == session_id)
            .map(|v| {
                if v.status == VoucherStatus::Issued {
                    v.status = VoucherStatus::Fulfilled;
                    v.fulfilled_at = Some(fulfilled_at);
                }
                v.clone()
            }))
    }

    async fn due_email_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> CheckoutResult<Vec<GeneratedVoucher>> {
        let state = self.state.lock().await;
        let mut due: Vec<GeneratedVoucher> = state
            .vouchers
            .iter()
            .filter(|v| {
                v.delivery_method == DeliveryMethod::Email
                    && v.email_due(now)
                    && v.created_at <= created_before
            })
            .cloned()
            .collect();
        due.sort_by_key(|v| v.sequence_number);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_emailed(&self, voucher_id: &str, emailed_at: DateTime<Utc>) -> CheckoutResult<()> {
        let mut state = self.state.lock().await;
        if let Some(voucher) = state.vouchers.iter_mut().find(|v| v.id == voucher_id) {
            voucher.emailed_at.get_or_insert(emailed_at);
        }
        Ok(())
    }
}
