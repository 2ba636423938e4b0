use chrono::Duration;
use futures_util::{stream, StreamExt};
use tracing::warn;
use voucher_core::mail::deliver_voucher_email;
use voucher_core::CheckoutResult;

use crate::WorkerState;

/// Vouchers younger than this are left to the immediate send in the success
/// handler, so a customer never gets the same email twice.
pub const IMMEDIATE_SEND_GRACE_MINUTES: i64 = 15;

pub const BATCH_LIMIT: i64 = 50;

const CONCURRENCY: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Send every email voucher whose delivery date has arrived and that has not
/// been emailed yet. Failures stay unsent and are picked up by the next pass.
pub async fn run_pass(state: &WorkerState) -> CheckoutResult<PassReport> {
    let now = state.clock.now();
    let created_before = now - Duration::minutes(IMMEDIATE_SEND_GRACE_MINUTES);
    let due = state
        .ledger
        .due_email_deliveries(now, created_before, BATCH_LIMIT)
        .await?;

    let results: Vec<bool> = stream::iter(due.iter())
        .map(|voucher| async move {
            match deliver_voucher_email(
                state.mailer.as_ref(),
                state.ledger.as_ref(),
                state.clock.as_ref(),
                voucher,
                &state.currency,
            )
            .await
            {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        session_id = %voucher.session_id,
                        security_code = %voucher.security_code,
                        error = %err,
                        "voucher email failed, will retry next pass"
                    );
                    false
                }
            }
        })
        .buffer_unordered(CONCURRENCY)
        .collect()
        .await;

    let sent = results.iter().filter(|ok| **ok).count();
    Ok(PassReport {
        due: due.len(),
        sent,
        failed: results.len() - sent,
    })
}
