//! Coupon usage bookkeeping. One row per payment session; counts are derived.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Returns false when the session was already recorded.
pub async fn record(
    pool: &PgPool,
    session_id: &str,
    code: &str,
    customer_email: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO coupon_redemptions (session_id, code, customer_email, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (session_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(code.to_uppercase())
    .bind(customer_email)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn count_by_code(pool: &PgPool, code: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM coupon_redemptions WHERE code = $1")
        .bind(code.to_uppercase())
        .fetch_one(pool)
        .await
}

pub async fn count_by_code_and_email(
    pool: &PgPool,
    code: &str,
    customer_email: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM coupon_redemptions
        WHERE code = $1 AND lower(customer_email) = lower($2)
        "#,
    )
    .bind(code.to_uppercase())
    .bind(customer_email)
    .fetch_one(pool)
    .await
}
