//! Deployment watchdog
//!
//! Moves jobs stuck past their per-stage timeout (or whose device went
//! offline before progressing past Notified) to Failed, without needing
//! the originating caller's connection to remain open.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::deploy::orchestrator::Orchestrator;

/// Watchdog options
#[derive(Debug, Clone)]
pub struct Options {
    /// Scan interval
    pub interval: Duration,

    /// Initial delay before the first scan
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Run the deployment watchdog worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Deployment watchdog starting...");

    sleep_fn(options.initial_delay).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployment watchdog shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with scan
            }
        }

        let expired = orchestrator.expire_stale(Utc::now());
        if expired > 0 {
            debug!("Watchdog failed {} stale job(s)", expired);
        }
    }
}
