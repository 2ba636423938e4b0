use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use voucher_core::clock::{Clock, SystemClock};
use voucher_core::config::Settings;
use voucher_core::mail::{HttpMailer, LogMailer, Mailer};

mod jobs;

#[derive(Debug, Parser)]
#[command(name = "voucher-worker")]
#[command(about = "Sends scheduled and retried voucher emails", version)]
struct Args {
    /// Run a single delivery pass and exit.
    #[arg(long)]
    once: bool,
    /// Seconds between passes. Defaults to VOUCHER_WORKER_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[derive(Clone)]
pub struct WorkerState {
    pub ledger: Arc<dyn voucher_core::ledger::VoucherLedger>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub currency: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;

    let database_url = settings
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL or VOUCHER_DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    let timeout = Duration::from_secs(settings.http_timeout_secs);
    let mailer: Arc<dyn Mailer> = match (&settings.email_api_url, &settings.email_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpMailer::new(url, key, &settings.email_from, timeout)?),
        _ => Arc::new(LogMailer),
    };

    let state = WorkerState {
        ledger: Arc::new(db::PgLedger::new(pool)),
        mailer,
        clock: Arc::new(SystemClock),
        currency: settings.currency.clone(),
    };

    if args.once {
        let report = jobs::email_delivery::run_pass(&state).await?;
        info!(due = report.due, sent = report.sent, failed = report.failed, "delivery pass finished");
        return Ok(());
    }

    let interval_secs = args.interval_secs.unwrap_or(settings.worker_interval_secs).max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval_secs, "worker starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match jobs::email_delivery::run_pass(&state).await {
                    Ok(report) if report.due > 0 => {
                        info!(due = report.due, sent = report.sent, failed = report.failed, "delivery pass finished");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "delivery pass failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("worker shutting down");
                break;
            }
        }
    }

    Ok(())
}
