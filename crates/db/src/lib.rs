pub mod ledger;
pub mod models;

pub mod queries {
    pub mod coupon_redemptions;
    pub mod pending_checkouts;
    pub mod vouchers;
}

pub use ledger::PgLedger;

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
