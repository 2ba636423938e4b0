use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const MOCK_SESSION_PREFIX: &str = "mock_cs_";
pub const NO_COUPON: &str = "none";

/// Largest single charge the payment provider accepts, in cents. The
/// `range` bounds in the validators below repeat this literal.
pub const MAX_AMOUNT_CENTS: i64 = 99_999_999;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    Email,
    Post,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Post => "post",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Issued,
    Fulfilled,
}

/// One cart row as submitted by the shop front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 0, max = 99999999))]
    pub unit_price_cents: i64,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
}

/// A cart row after the server applied catalog prices and coupon discounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PricedLineItem {
    pub sku: String,
    pub name: String,
    pub base_unit_cents: i64,
    pub unit_amount_cents: i64,
    pub quantity: u32,
    pub discounted: bool,
}

impl PricedLineItem {
    /// Priced carts are bounded by `MAX_AMOUNT_CENTS`, so this never saturates
    /// for items that went through pricing.
    pub fn total_cents(&self) -> i64 {
        self.unit_amount_cents
            .saturating_mul(i64::from(self.quantity))
    }
}

/// Where a printed voucher is posted to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(equal = 2))]
    pub country: String,
}

impl ShippingAddress {
    /// Lines as they go on an envelope.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.name.clone(), self.line1.clone()];
        if let Some(line2) = self.line2.as_deref().filter(|l| !l.trim().is_empty()) {
            lines.push(line2.to_string());
        }
        lines.push(format!("{} {}", self.postal_code, self.city));
        lines.push(self.country.to_uppercase());
        lines
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoucherPersonalization {
    #[validate(length(max = 100))]
    pub recipient_name: Option<String>,
    #[validate(email)]
    pub recipient_email: Option<String>,
    #[validate(length(max = 100))]
    pub sender_name: Option<String>,
    #[validate(email)]
    pub sender_email: Option<String>,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
    #[validate(length(max = 2048))]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    pub delivery_date: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub voucher_type: Option<String>,
    #[validate]
    pub shipping_address: Option<ShippingAddress>,
}

/// Everything the success step needs about a checkout, stored server-side under
/// the payment session id instead of being squeezed into provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingCheckout {
    pub session_id: String,
    pub coupon_code: Option<String>,
    pub customer_email: Option<String>,
    pub personalization: Option<VoucherPersonalization>,
    pub line_items: Vec<PricedLineItem>,
    pub face_value_cents: i64,
    pub amount_total_cents: i64,
    pub mock: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVoucher {
    pub id: String,
    pub session_id: String,
    pub security_code: String,
    pub sequence_number: i64,
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
    pub shipping_address: Option<ShippingAddress>,
    pub status: VoucherStatus,
    pub emailed_at: Option<DateTime<Utc>>,
    pub document_rendered_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input to voucher issuance; the ledger assigns id, sequence and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewVoucher {
    #[validate(length(min = 1))]
    pub session_id: String,
    #[validate(email)]
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    #[validate(range(min = 1, max = 99999999))]
    pub amount_cents: i64,
    pub voucher_type: String,
    pub message: Option<String>,
    pub delivery_method: DeliveryMethod,
    pub delivery_date: Option<DateTime<Utc>>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub photo_url: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
}

impl GeneratedVoucher {
    pub fn from_new(
        new: &NewVoucher,
        id: String,
        sequence_number: i64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        GeneratedVoucher {
            id,
            session_id: new.session_id.clone(),
            security_code: format_security_code(sequence_number),
            sequence_number,
            recipient_email: new.recipient_email.clone(),
            recipient_name: new.recipient_name.clone(),
            amount_cents: new.amount_cents,
            voucher_type: new.voucher_type.clone(),
            message: new.message.clone(),
            delivery_method: new.delivery_method,
            delivery_date: new.delivery_date,
            sender_name: new.sender_name.clone(),
            sender_email: new.sender_email.clone(),
            photo_url: new.photo_url.clone(),
            shipping_address: new.shipping_address.clone(),
            status: VoucherStatus::Issued,
            emailed_at: None,
            document_rendered_at: issued_at,
            fulfilled_at: None,
            created_at: issued_at,
        }
    }

    /// Email vouchers go out right away unless the buyer picked a later date.
    pub fn email_due(&self, now: DateTime<Utc>) -> bool {
        self.delivery_method == DeliveryMethod::Email
            && self.emailed_at.is_none()
            && self.delivery_date.map_or(true, |date| date <= now)
    }

    pub fn awaiting_print(&self) -> bool {
        self.delivery_method == DeliveryMethod::Post && self.status != VoucherStatus::Fulfilled
    }
}

pub fn is_mock_session_id(session_id: &str) -> bool {
    session_id.starts_with(MOCK_SESSION_PREFIX)
}

pub fn new_voucher_id() -> String {
    format!("gv_{}", nanoid::nanoid!(12))
}

pub fn format_security_code(sequence: i64) -> String {
    format!("GV-{:06}", sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn voucher(method: DeliveryMethod, delivery_date: Option<DateTime<Utc>>) -> GeneratedVoucher {
        let created = Utc.with_ymd_and_hms(2026, 11, 2, 10, 0, 0).unwrap();
        GeneratedVoucher {
            id: "gv_1".to_string(),
            session_id: "cs_test_1".to_string(),
            security_code: format_security_code(1),
            sequence_number: 1,
            recipient_email: "anna@example.at".to_string(),
            recipient_name: Some("Anna".to_string()),
            amount_cents: 9500,
            voucher_type: "Family-Basic".to_string(),
            message: None,
            delivery_method: method,
            delivery_date,
            sender_name: None,
            sender_email: None,
            photo_url: None,
            shipping_address: None,
            status: VoucherStatus::Issued,
            emailed_at: None,
            document_rendered_at: created,
            fulfilled_at: None,
            created_at: created,
        }
    }

    #[test]
    fn test_security_code_format() {
        assert_eq!(format_security_code(1), "GV-000001");
        assert_eq!(format_security_code(123456), "GV-123456");
        assert_eq!(format_security_code(1234567), "GV-1234567");
    }

    #[test]
    fn test_mock_session_detection() {
        assert!(is_mock_session_id("mock_cs_abc"));
        assert!(!is_mock_session_id("cs_live_abc"));
    }

    #[test]
    fn test_cart_item_bounds() {
        let item = CartLineItem {
            sku: "Family-Basic".to_string(),
            name: "Family Basic Shooting".to_string(),
            unit_price_cents: 9500,
            quantity: 1,
        };
        assert!(item.validate().is_ok());
        assert!(CartLineItem { unit_price_cents: MAX_AMOUNT_CENTS + 1, ..item.clone() }
            .validate()
            .is_err());
        assert!(CartLineItem { quantity: 0, ..item.clone() }.validate().is_err());
        assert!(CartLineItem { quantity: 101, ..item.clone() }.validate().is_err());
        assert!(CartLineItem { sku: String::new(), ..item }.validate().is_err());
    }

    #[test]
    fn test_personalization_emails_and_address() {
        let mut personalization = VoucherPersonalization {
            recipient_email: Some("anna@example.at".to_string()),
            shipping_address: Some(ShippingAddress {
                name: "Anna Berger".to_string(),
                line1: "Mariahilfer Str. 1".to_string(),
                line2: None,
                postal_code: "1060".to_string(),
                city: "Wien".to_string(),
                country: "AT".to_string(),
            }),
            ..Default::default()
        };
        assert!(personalization.validate().is_ok());

        personalization.sender_email = Some("not-an-email".to_string());
        assert!(personalization.validate().is_err());
        personalization.sender_email = None;

        if let Some(address) = personalization.shipping_address.as_mut() {
            address.country = "Austria".to_string();
        }
        assert!(personalization.validate().is_err());
    }

    #[test]
    fn test_address_lines() {
        let address = ShippingAddress {
            name: "Anna Berger".to_string(),
            line1: "Mariahilfer Str. 1".to_string(),
            line2: Some("Top 4".to_string()),
            postal_code: "1060".to_string(),
            city: "Wien".to_string(),
            country: "at".to_string(),
        };
        assert_eq!(
            address.lines(),
            ["Anna Berger", "Mariahilfer Str. 1", "Top 4", "1060 Wien", "AT"]
        );
    }

    #[test]
    fn test_email_due_respects_delivery_date() {
        let now = Utc.with_ymd_and_hms(2026, 11, 2, 12, 0, 0).unwrap();
        assert!(voucher(DeliveryMethod::Email, None).email_due(now));
        assert!(voucher(DeliveryMethod::Email, Some(now - Duration::hours(1))).email_due(now));
        assert!(!voucher(DeliveryMethod::Email, Some(now + Duration::days(30))).email_due(now));
        assert!(!voucher(DeliveryMethod::Post, None).email_due(now));
    }

    #[test]
    fn test_awaiting_print() {
        let mut post = voucher(DeliveryMethod::Post, None);
        assert!(post.awaiting_print());
        post.status = VoucherStatus::Fulfilled;
        assert!(!post.awaiting_print());
        assert!(!voucher(DeliveryMethod::Email, None).awaiting_print());
    }

    #[test]
    fn test_personalization_defaults_to_email_delivery() {
        let parsed: VoucherPersonalization =
            serde_json::from_str(r#"{"recipientEmail":"anna@example.at"}"#).unwrap();
        assert_eq!(parsed.delivery_method, DeliveryMethod::Email);
        assert_eq!(parsed.recipient_email.as_deref(), Some("anna@example.at"));
    }
}
