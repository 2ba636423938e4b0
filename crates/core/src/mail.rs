use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::clock::Clock;
use crate::document::{escape_html, format_amount, render_voucher_html};
use crate::error::{CheckoutError, CheckoutResult};
use crate::ledger::VoucherLedger;
use crate::retry::with_retries;
use crate::types::GeneratedVoucher;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Base64 encoded file body.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> CheckoutResult<()>;
}

/// Transactional email over a JSON HTTP API with bearer auth.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: &str, from: &str, timeout: Duration) -> CheckoutResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CheckoutError::Email {
                status: None,
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> CheckoutResult<()> {
        let payload = json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html_body,
            "attachments": email.attachments,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CheckoutError::Email {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CheckoutError::Email {
            status: Some(status.as_u16()),
            message: format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
        })
    }
}

/// Used when no email API is configured. Emails are logged, never sent.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> CheckoutResult<()> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "email delivery disabled, not sending"
        );
        Ok(())
    }
}

pub fn voucher_email(voucher: &GeneratedVoucher, currency: &str) -> OutgoingEmail {
    let greeting = match voucher.recipient_name.as_deref() {
        Some(name) => format!("Liebe/r {},", escape_html(name)),
        None => "Hallo,".to_string(),
    };
    let from_line = match voucher.sender_name.as_deref() {
        Some(name) => format!("<p>{} schenkt dir einen Fotoshooting-Gutschein.</p>", escape_html(name)),
        None => "<p>Du hast einen Fotoshooting-Gutschein erhalten.</p>".to_string(),
    };
    let html_body = format!(
        "<p>{}</p>\n{}\n<p>Wert: {}<br>Gutscheincode: <strong>{}</strong></p>\n<p>Den Gutschein findest du im Anhang.</p>\n",
        greeting,
        from_line,
        format_amount(voucher.amount_cents, currency),
        escape_html(&voucher.security_code),
    );

    OutgoingEmail {
        to: voucher.recipient_email.clone(),
        subject: format!("Dein Gutschein {}", voucher.security_code),
        html_body,
        attachments: vec![Attachment {
            filename: format!("gutschein-{}.html", voucher.security_code),
            content: STANDARD.encode(render_voucher_html(voucher, currency)),
        }],
    }
}

/// Send the voucher to its recipient and record the send. Transient
/// failures are retried; the voucher stays un-emailed on final failure so the
/// worker picks it up later.
pub async fn deliver_voucher_email(
    mailer: &dyn Mailer,
    ledger: &dyn VoucherLedger,
    clock: &dyn Clock,
    voucher: &GeneratedVoucher,
    currency: &str,
) -> CheckoutResult<()> {
    let email = voucher_email(voucher, currency);
    let email = &email;
    with_retries("send_voucher_email", move || mailer.send(email)).await?;
    ledger.mark_emailed(&voucher.id, clock.now()).await?;
    info!(
        session_id = %voucher.session_id,
        security_code = %voucher.security_code,
        "voucher email sent"
    );
    Ok(())
}
