//! Upload-session retention sweep

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::upload::assembler::UploadAssembler;

/// Upload GC options
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
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(60),
        }
    }
}

/// Run the upload GC worker
pub async fn run<S, F>(
    options: &Options,
    assembler: &UploadAssembler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Upload GC worker starting...");

    sleep_fn(options.initial_delay).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Upload GC worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with sweep
            }
        }

        let removed = assembler.gc(Utc::now());
        debug!("Upload GC removed {} session(s)", removed);
    }
}
