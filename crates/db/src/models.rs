use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use voucher_core::types::{
    self as core_types, PricedLineItem, ShippingAddress, VoucherPersonalization,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "delivery_method", rename_all = "lowercase")]
pub enum DeliveryMethod {
    Email,
    Post,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "voucher_status", rename_all = "lowercase")]
pub enum VoucherStatus {
    Issued,
    Fulfilled,
}

impl From<core_types::DeliveryMethod> for DeliveryMethod {
    fn from(method: core_types::DeliveryMethod) -> Self {
        match method {
            core_types::DeliveryMethod::Email => DeliveryMethod::Email,
            core_types::DeliveryMethod::Post => DeliveryMethod::Post,
        }
    }
}

impl From<DeliveryMethod> for core_types::DeliveryMethod {
    fn from(method: DeliveryMethod) -> Self {
        match method {
            DeliveryMethod::Email => core_types::DeliveryMethod::Email,
            DeliveryMethod::Post => core_types::DeliveryMethod::Post,
        }
    }
}

impl From<VoucherStatus> for core_types::VoucherStatus {
    fn from(status: VoucherStatus) -> Self {
        match status {
            VoucherStatus::Issued => core_types::VoucherStatus::Issued,
            VoucherStatus::Fulfilled => core_types::VoucherStatus::Fulfilled,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Voucher {
    pub id: String,
    pub session_id: String,
    pub sequence_number: i64,
    pub security_code: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub amount_cents: i64,
    pub voucher_type: String,
    pub message: Option<String>,
    pub delivery_method: DeliveryMethod,
    pub delivery_date: Option<DateTime<Utc>>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub photo_url: Option<String>,
    pub shipping_address: Option<Json<ShippingAddress>>,
    pub status: VoucherStatus,
    pub emailed_at: Option<DateTime<Utc>>,
    pub document_rendered_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Voucher> for core_types::GeneratedVoucher {
    fn from(row: Voucher) -> Self {
        core_types::GeneratedVoucher {
            id: row.id,
            session_id: row.session_id,
            security_code: row.security_code,
            sequence_number: row.sequence_number,
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            amount_cents: row.amount_cents,
            voucher_type: row.voucher_type,
            message: row.message,
            delivery_method: row.delivery_method.into(),
            delivery_date: row.delivery_date,
            sender_name: row.sender_name,
            sender_email: row.sender_email,
            photo_url: row.photo_url,
            shipping_address: row.shipping_address.map(|a| a.0),
            status: row.status.into(),
            emailed_at: row.emailed_at,
            document_rendered_at: row.document_rendered_at,
            fulfilled_at: row.fulfilled_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingCheckout {
    pub session_id: String,
    pub coupon_code: Option<String>,
    pub customer_email: Option<String>,
    pub personalization: Option<Json<VoucherPersonalization>>,
    pub line_items: Json<Vec<PricedLineItem>>,
    pub face_value_cents: i64,
    pub amount_total_cents: i64,
    pub mock: bool,
    pub created_at: DateTime<Utc>,
}

impl From<PendingCheckout> for core_types::PendingCheckout {
    fn from(row: PendingCheckout) -> Self {
        core_types::PendingCheckout {
            session_id: row.session_id,
            coupon_code: row.coupon_code,
            customer_email: row.customer_email,
            personalization: row.personalization.map(|p| p.0),
            line_items: row.line_items.0,
            face_value_cents: row.face_value_cents,
            amount_total_cents: row.amount_total_cents,
            mock: row.mock,
            created_at: row.created_at,
        }
    }
}
