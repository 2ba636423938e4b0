use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::CheckoutResult;

pub const MAX_ATTEMPTS: u32 = 3;

/// Run a collaborator call, retrying transient failures (timeouts, 5xx) with
/// exponential backoff. Anything else is returned on the first failure.
pub async fn with_retries<T, F, Fut>(operation: &'static str, mut call: F) -> CheckoutResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckoutResult<T>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(200))
        .with_max_interval(Duration::from_secs(2))
        .with_max_elapsed_time(None)
        .build();
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_secs(2));
                warn!(operation, attempt, ?delay, error = %err, "transient collaborator failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
