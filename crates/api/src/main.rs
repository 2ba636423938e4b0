use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use voucher_core::clock::SystemClock;
use voucher_core::config::Settings;
use voucher_core::coupons::{CouponSource, FileCouponSource, StaticCouponSource};
use voucher_core::ledger::{MemoryLedger, VoucherLedger};
use voucher_core::mail::{HttpMailer, LogMailer, Mailer};
use voucher_core::payment::{PaymentGateway, StripeGateway};
use voucher_core::pricing::ProductCatalog;

mod error;
mod middleware;
mod routes;
mod state;

use crate::state::{AppState, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()
        .context("VOUCHER_ADMIN_TOKEN and VOUCHER_LINK_SECRET must be set")?;

    if settings.is_production() {
        anyhow::ensure!(
            settings.stripe_secret_key.is_some(),
            "STRIPE_SECRET_KEY must be set in production"
        );
        anyhow::ensure!(
            settings.database_url.is_some(),
            "DATABASE_URL must be set in production"
        );
    }

    let timeout = Duration::from_secs(settings.http_timeout_secs);

    let (ledger, storage): (Arc<dyn VoucherLedger>, &'static str) = match &settings.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            db::migrate(&pool).await?;
            (Arc::new(db::PgLedger::new(pool)), "postgres")
        }
        None => {
            warn!("no database configured, vouchers are kept in memory");
            (Arc::new(MemoryLedger::new()), "memory")
        }
    };

    let gateway: Option<Arc<dyn PaymentGateway>> = match &settings.stripe_secret_key {
        Some(key) => Some(Arc::new(StripeGateway::with_timeout(
            &settings.stripe_api_base,
            key,
            timeout,
        )?)),
        None => {
            warn!("no payment key configured, checkout runs in mock mode");
            None
        }
    };

    let mailer: Arc<dyn Mailer> = match (&settings.email_api_url, &settings.email_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpMailer::new(url, key, &settings.email_from, timeout)?),
        _ => Arc::new(LogMailer),
    };

    let coupon_source: Arc<dyn CouponSource> = match &settings.coupons_file {
        Some(path) => Arc::new(FileCouponSource::new(path.clone())),
        None => Arc::new(StaticCouponSource::new(settings.coupons_json.clone())),
    };

    let catalog = match &settings.product_prices_json {
        Some(raw) => ProductCatalog::from_json(raw).context("VOUCHER_PRODUCT_PRICES is not valid JSON")?,
        None => ProductCatalog::default(),
    };
    if !catalog.is_empty() {
        info!(products = catalog.len(), "price catalog loaded");
    }

    let addr: SocketAddr = settings.api_bind.parse()?;

    let state = AppState::build(
        settings,
        Backends {
            ledger,
            storage,
            gateway,
            mailer,
            coupon_source,
            catalog,
            clock: Arc::new(SystemClock),
        },
    );

    let app = routes::app(state);

    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
