//! Presence sweep worker
//!
//! Converts stale `last_seen_at` into offline status on a fixed interval
//! so a silent device flips offline purely from time passing, with no
//! heartbeat involved.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::cache::devices::DeviceListCache;
use crate::registry::registry::DeviceRegistry;

/// Presence sweep options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,

    /// Initial delay before the first sweep
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the presence sweep worker
pub async fn run<S, F>(
    options: &Options,
    registry: &DeviceRegistry,
    device_list_cache: &DeviceListCache,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Presence sweep worker starting...");

    sleep_fn(options.initial_delay).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Presence sweep worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with sweep
            }
        }

        let flips = registry.sweep(Utc::now());
        if flips > 0 {
            device_list_cache.invalidate();
            debug!("Presence sweep published {} flip(s)", flips);
        }
    }
}
