use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use validator::Validate;

use crate::clock::Clock;
use crate::error::CheckoutResult;
use crate::ledger::VoucherLedger;
use crate::types::{GeneratedVoucher, NewVoucher};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedVoucher {
    pub voucher: GeneratedVoucher,
    /// False when the session already had a voucher.
    pub created: bool,
}

pub struct IssuanceService {
    ledger: Arc<dyn VoucherLedger>,
    clock: Arc<dyn Clock>,
}

impl IssuanceService {
    pub fn new(ledger: Arc<dyn VoucherLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub async fn create_gift_voucher(&self, voucher: NewVoucher) -> CheckoutResult<IssuedVoucher> {
        let voucher = NewVoucher {
            session_id: voucher.session_id.trim().to_string(),
            recipient_email: voucher.recipient_email.trim().to_string(),
            ..voucher
        };
        voucher.validate()?;

        let (generated, created) = self
            .ledger
            .insert_voucher(&voucher, self.clock.now())
            .await?;

        if created {
            info!(
                session_id = %generated.session_id,
                security_code = %generated.security_code,
                delivery_method = generated.delivery_method.as_str(),
                "voucher issued"
            );
        }

        Ok(IssuedVoucher {
            voucher: generated,
            created,
        })
    }
}
