use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use voucher_core::error::{CheckoutError, CheckoutResult};
use voucher_core::ledger::VoucherLedger;
use voucher_core::types::{
    format_security_code, new_voucher_id, GeneratedVoucher, NewVoucher, PendingCheckout,
};

use crate::queries::{coupon_redemptions, pending_checkouts, vouchers};

/// Postgres-backed voucher ledger.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn persistence(err: sqlx::Error) -> CheckoutError {
    CheckoutError::Persistence(err.to_string())
}

#[async_trait]
impl VoucherLedger for PgLedger {
    async fn save_pending_checkout(&self, pending: &PendingCheckout) -> CheckoutResult<()> {
        pending_checkouts::upsert(&self.pool, pending)
            .await
            .map_err(persistence)
    }

    async fn pending_checkout(&self, session_id: &str) -> CheckoutResult<Option<PendingCheckout>> {
        let row = pending_checkouts::get_by_session(&self.pool, session_id)
            .await
            .map_err(persistence)?;
        Ok(row.map(Into::into))
    }

    async fn record_coupon_redemption(
        &self,
        session_id: &str,
        code: &str,
        customer_email: Option<&str>,
        redeemed_at: DateTime<Utc>,
    ) -> CheckoutResult<bool> {
        coupon_redemptions::record(&self.pool, session_id, code, customer_email, redeemed_at)
            .await
            .map_err(persistence)
    }

    async fn coupon_usage_count(
        &self,
        code: &str,
        customer_email: Option<&str>,
    ) -> CheckoutResult<i64> {
        let count = match customer_email {
            Some(email) => coupon_redemptions::count_by_code_and_email(&self.pool, code, email).await,
            None => coupon_redemptions::count_by_code(&self.pool, code).await,
        };
        count.map_err(persistence)
    }

    async fn insert_voucher(
        &self,
        voucher: &NewVoucher,
        issued_at: DateTime<Utc>,
    ) -> CheckoutResult<(GeneratedVoucher, bool)> {
        if let Some(existing) = vouchers::get_by_session(&self.pool, &voucher.session_id)
            .await
            .map_err(persistence)?
        {
            return Ok((existing.into(), false));
        }

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let sequence = vouchers::next_sequence(&mut *tx)
            .await
            .map_err(persistence)?;
        let inserted = vouchers::insert(
            &mut *tx,
            &new_voucher_id(),
            sequence,
            &format_security_code(sequence),
            voucher,
            issued_at,
        )
        .await
        .map_err(persistence)?;

        match inserted {
            Some(row) => {
                tx.commit().await.map_err(persistence)?;
                Ok((row.into(), true))
            }
            None => {
                tx.rollback().await.map_err(persistence)?;
                warn!(
                    session_id = %voucher.session_id,
                    sequence,
                    "concurrent issuance for session, returning the existing voucher"
                );
                let existing = vouchers::get_by_session(&self.pool, &voucher.session_id)
                    .await
                    .map_err(persistence)?
                    .ok_or_else(|| {
                        CheckoutError::Persistence(format!(
                            "voucher for session {} vanished after conflict",
                            voucher.session_id
                        ))
                    })?;
                Ok((existing.into(), false))
            }
        }
    }

    async fn voucher_by_session(&self, session_id: &str) -> CheckoutResult<Option<GeneratedVoucher>> {
        let row = vouchers::get_by_session(&self.pool, session_id)
            .await
            .map_err(persistence)?;
        Ok(row.map(Into::into))
    }

    async fn print_queue(&self) -> CheckoutResult<Vec<GeneratedVoucher>> {
        let rows = vouchers::print_queue(&self.pool).await.map_err(persistence)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn touch_document(
        &self,
        session_id: &str,
        rendered_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>> {
        let row = vouchers::touch_document(&self.pool, session_id, rendered_at)
            .await
            .map_err(persistence)?;
        Ok(row.map(Into::into))
    }

    async fn mark_fulfilled(
        &self,
        session_id: &str,
        fulfilled_at: DateTime<Utc>,
    ) -> CheckoutResult<Option<GeneratedVoucher>> {
        let row = vouchers::mark_fulfilled(&self.pool, session_id, fulfilled_at)
            .await
            .map_err(persistence)?;
        Ok(row.map(Into::into))
    }

    async fn due_email_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> CheckoutResult<Vec<GeneratedVoucher>> {
        let rows = vouchers::list_due_emails(&self.pool, now, created_before, limit)
            .await
            .map_err(persistence)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_emailed(&self, voucher_id: &str, emailed_at: DateTime<Utc>) -> CheckoutResult<()> {
        vouchers::mark_emailed(&self.pool, voucher_id, emailed_at)
            .await
            .map_err(persistence)
    }
}
