//! Checkout context kept server-side between session creation and the
//! success redirect.

use sqlx::types::Json;
use sqlx::PgPool;
use voucher_core::types::PendingCheckout as NewPendingCheckout;

use crate::models::PendingCheckout;

pub async fn upsert(pool: &PgPool, pending: &NewPendingCheckout) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pending_checkouts (
            session_id, coupon_code, customer_email, personalization, line_items,
            face_value_cents, amount_total_cents, mock, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (session_id) DO UPDATE
        SET coupon_code = EXCLUDED.coupon_code,
            customer_email = EXCLUDED.customer_email,
            personalization = EXCLUDED.personalization,
            line_items = EXCLUDED.line_items,
            face_value_cents = EXCLUDED.face_value_cents,
            amount_total_cents = EXCLUDED.amount_total_cents,
            mock = EXCLUDED.mock
        "#,
    )
    .bind(&pending.session_id)
    .bind(&pending.coupon_code)
    .bind(&pending.customer_email)
    .bind(pending.personalization.as_ref().map(Json))
    .bind(Json(&pending.line_items))
    .bind(pending.face_value_cents)
    .bind(pending.amount_total_cents)
    .bind(pending.mock)
    .bind(pending.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<PendingCheckout>, sqlx::Error> {
    sqlx::query_as::<_, PendingCheckout>(
        r#"
        SELECT session_id, coupon_code, customer_email, personalization, line_items,
               face_value_cents, amount_total_cents, mock, created_at
        FROM pending_checkouts
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
}
