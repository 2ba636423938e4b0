use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, CheckoutResult};
use crate::types::{PricedLineItem, ShippingAddress};

/// Countries a printed voucher can be posted to.
pub const SHIPPING_COUNTRIES: [&str; 3] = ["AT", "DE", "CH"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionParams {
    pub checkout_ref: String,
    pub line_items: Vec<PricedLineItem>,
    pub voucher_used: String,
    pub customer_email: Option<String>,
    pub collect_shipping: bool,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidLineItem {
    pub description: String,
    pub quantity: u32,
    pub amount_total_cents: i64,
}

/// The payment session as the success page reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidSession {
    pub id: String,
    pub payment_status: String,
    pub customer_email: Option<String>,
    pub amount_total_cents: Option<i64>,
    pub currency: Option<String>,
    pub metadata: HashMap<String, String>,
    pub line_items: Vec<PaidLineItem>,
    pub shipping_address: Option<ShippingAddress>,
}

impl PaidSession {
    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status.as_str(), "paid" | "no_payment_required")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, params: &CreateSessionParams) -> CheckoutResult<ProviderSession>;

    /// Fetch a session with its line items expanded.
    async fn retrieve_session(&self, session_id: &str) -> CheckoutResult<PaidSession>;
}

/// Form body for `POST /v1/checkout/sessions`. Every line carries its own
/// `price_data`, so the provider never prices anything itself.
pub fn session_form(params: &CreateSessionParams) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), params.success_url.clone()),
        ("cancel_url".into(), params.cancel_url.clone()),
        ("allow_promotion_codes".into(), "false".into()),
        ("client_reference_id".into(), params.checkout_ref.clone()),
        ("metadata[voucherUsed]".into(), params.voucher_used.clone()),
        ("metadata[checkoutRef]".into(), params.checkout_ref.clone()),
    ];

    if let Some(email) = params.customer_email.as_deref() {
        form.push(("customer_email".into(), email.to_string()));
    }

    for (i, item) in params.line_items.iter().enumerate() {
        let key = |suffix: &str| format!("line_items[{}]{}", i, suffix);
        form.push((key("[price_data][currency]"), params.currency.clone()));
        form.push((
            key("[price_data][unit_amount]"),
            item.unit_amount_cents.to_string(),
        ));
        form.push((key("[price_data][product_data][name]"), item.name.clone()));
        form.push((
            key("[price_data][product_data][metadata][sku]"),
            item.sku.clone(),
        ));
        form.push((key("[quantity]"), item.quantity.to_string()));
    }

    if params.collect_shipping {
        for (i, country) in SHIPPING_COUNTRIES.iter().enumerate() {
            form.push((
                format!("shipping_address_collection[allowed_countries][{}]", i),
                country.to_string(),
            ));
        }
    }

    form
}

/// Derived from the checkout reference, so a retried create after a timeout
/// returns the session the provider already made instead of a second one.
pub fn idempotency_key(params: &CreateSessionParams) -> String {
    format!("checkout-session-{}", params.checkout_ref)
}

pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(client: reqwest::Client, api_base: &str, secret_key: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    pub fn with_timeout(api_base: &str, secret_key: &str, timeout: Duration) -> CheckoutResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CheckoutError::provider(None, err.to_string()))?;
        Ok(Self::new(client, api_base, secret_key))
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    payment_status: String,
    customer_email: Option<String>,
    customer_details: Option<StripeCustomerDetails>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    line_items: Option<StripeList<StripeLineItem>>,
    shipping_details: Option<StripeShipping>,
    collected_information: Option<StripeCollectedInformation>,
}

#[derive(Debug, Deserialize)]
struct StripeCollectedInformation {
    shipping_details: Option<StripeShipping>,
}

#[derive(Debug, Deserialize)]
struct StripeShipping {
    name: Option<String>,
    address: Option<StripeAddress>,
}

#[derive(Debug, Deserialize)]
struct StripeAddress {
    line1: Option<String>,
    line2: Option<String>,
    postal_code: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

impl StripeShipping {
    /// Partial addresses are dropped; a printed voucher needs every line.
    fn into_address(self) -> Option<ShippingAddress> {
        let address = self.address?;
        Some(ShippingAddress {
            name: self.name.filter(|n| !n.trim().is_empty())?,
            line1: address.line1.filter(|l| !l.trim().is_empty())?,
            line2: address.line2.filter(|l| !l.trim().is_empty()),
            postal_code: address.postal_code?,
            city: address.city?,
            country: address.country?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeLineItem {
    #[serde(default)]
    description: String,
    quantity: Option<u32>,
    amount_total: i64,
}

impl From<StripeSession> for PaidSession {
    fn from(session: StripeSession) -> Self {
        let customer_email = session
            .customer_email
            .or_else(|| session.customer_details.and_then(|details| details.email));
        let shipping_address = session
            .collected_information
            .and_then(|info| info.shipping_details)
            .or(session.shipping_details)
            .and_then(StripeShipping::into_address);
        PaidSession {
            id: session.id,
            payment_status: session.payment_status,
            customer_email,
            amount_total_cents: session.amount_total,
            currency: session.currency,
            metadata: session.metadata,
            line_items: session
                .line_items
                .map(|list| {
                    list.data
                        .into_iter()
                        .map(|item| PaidLineItem {
                            description: item.description,
                            quantity: item.quantity.unwrap_or(1),
                            amount_total_cents: item.amount_total,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            shipping_address,
        }
    }
}

pub(crate) fn provider_error_message(body: &str) -> String {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => match (parsed.error.message, parsed.error.kind) {
            (Some(message), _) => message,
            (None, Some(kind)) => kind,
            (None, None) => "unknown provider error".to_string(),
        },
        Err(_) if body.trim().is_empty() => "empty provider response".to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> CheckoutResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CheckoutError::provider(
            Some(status.as_u16()),
            provider_error_message(&body),
        ));
    }
    response.json::<T>().await.map_err(|err| {
        CheckoutError::provider(Some(status.as_u16()), format!("invalid response: {}", err))
    })
}

fn transport_error(err: reqwest::Error) -> CheckoutError {
    CheckoutError::provider(err.status().map(|s| s.as_u16()), err.to_string())
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(&self, params: &CreateSessionParams) -> CheckoutResult<ProviderSession> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key(params))
            .form(&session_form(params))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn retrieve_session(&self, session_id: &str) -> CheckoutResult<PaidSession> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .query(&[("expand[]", "line_items")])
            .send()
            .await
            .map_err(transport_error)?;
        let session: StripeSession = read_json(response).await?;
        Ok(session.into())
    }
}
