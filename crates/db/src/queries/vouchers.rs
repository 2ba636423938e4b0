//! Issued vouchers.
//!
//! `session_id` is unique, so a payment session can own at most one voucher.
//! Security codes come from `voucher_security_code_seq`.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};
use voucher_core::types::NewVoucher;

use crate::models::{DeliveryMethod, Voucher};

const COLUMNS: &str = r#"
    id, session_id, sequence_number, security_code, recipient_email, recipient_name,
    amount_cents, voucher_type, message, delivery_method, delivery_date,
    sender_name, sender_email, photo_url, shipping_address, status, emailed_at,
    document_rendered_at, fulfilled_at, created_at
"#;

pub async fn get_by_session(pool: &PgPool, session_id: &str) -> Result<Option<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        "SELECT {} FROM vouchers WHERE session_id = $1",
        COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

/// Take the next security code number. Must run in the same transaction as
/// the insert that uses it.
pub async fn next_sequence<'e, E: PgExecutor<'e>>(executor: E) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT nextval('voucher_security_code_seq')")
        .fetch_one(executor)
        .await
}

/// Insert a voucher unless the session already has one. Returns `None` when
/// another writer got there first.
pub async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    id: &str,
    sequence_number: i64,
    security_code: &str,
    voucher: &NewVoucher,
    issued_at: DateTime<Utc>,
) -> Result<Option<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        r#"
        INSERT INTO vouchers (
            id, session_id, sequence_number, security_code, recipient_email, recipient_name,
            amount_cents, voucher_type, message, delivery_method, delivery_date,
            sender_name, sender_email, photo_url, shipping_address, status,
            document_rendered_at, created_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 'issued', $16, $16
        )
        ON CONFLICT (session_id) DO NOTHING
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(id)
    .bind(&voucher.session_id)
    .bind(sequence_number)
    .bind(security_code)
    .bind(&voucher.recipient_email)
    .bind(&voucher.recipient_name)
    .bind(voucher.amount_cents)
    .bind(&voucher.voucher_type)
    .bind(&voucher.message)
    .bind(DeliveryMethod::from(voucher.delivery_method))
    .bind(voucher.delivery_date)
    .bind(&voucher.sender_name)
    .bind(&voucher.sender_email)
    .bind(&voucher.photo_url)
    .bind(voucher.shipping_address.clone().map(Json))
    .bind(issued_at)
    .fetch_optional(executor)
    .await
}

/// Postal vouchers still waiting to be printed, oldest first.
pub async fn print_queue(pool: &PgPool) -> Result<Vec<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        r#"
        SELECT {}
        FROM vouchers
        WHERE delivery_method = 'post' AND status <> 'fulfilled'
        ORDER BY created_at ASC, sequence_number ASC
        "#,
        COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn touch_document(
    pool: &PgPool,
    session_id: &str,
    rendered_at: DateTime<Utc>,
) -> Result<Option<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        r#"
        UPDATE vouchers
        SET document_rendered_at = $2
        WHERE session_id = $1
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(session_id)
    .bind(rendered_at)
    .fetch_optional(pool)
    .await
}

/// `issued -> fulfilled`. Repeating it keeps the first `fulfilled_at`.
pub async fn mark_fulfilled(
    pool: &PgPool,
    session_id: &str,
    fulfilled_at: DateTime<Utc>,
) -> Result<Option<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        r#"
        UPDATE vouchers
        SET status = 'fulfilled',
            fulfilled_at = COALESCE(fulfilled_at, $2)
        WHERE session_id = $1
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(session_id)
    .bind(fulfilled_at)
    .fetch_optional(pool)
    .await
}

/// Email vouchers whose delivery date has passed and that were never sent.
pub async fn list_due_emails(
    pool: &PgPool,
    now: DateTime<Utc>,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Voucher>, sqlx::Error> {
    sqlx::query_as::<_, Voucher>(&format!(
        r#"
        SELECT {}
        FROM vouchers
        WHERE delivery_method = 'email'
          AND emailed_at IS NULL
          AND (delivery_date IS NULL OR delivery_date <= $1)
          AND created_at <= $2
        ORDER BY sequence_number ASC
        LIMIT $3
        "#,
        COLUMNS
    ))
    .bind(now)
    .bind(created_before)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn mark_emailed(
    pool: &PgPool,
    id: &str,
    emailed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE vouchers
        SET emailed_at = COALESCE(emailed_at, $2)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(emailed_at)
    .execute(pool)
    .await?;
    Ok(())
}
