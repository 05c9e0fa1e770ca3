//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::CoreError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{presence, upload_gc, watchdog};

/// Run the fleetd server
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), CoreError> {
    info!("Initializing fleetd...");

    if options.admin_token.trim().is_empty() {
        return Err(CoreError::Validation(
            "an admin token must be configured".to_string(),
        ));
    }

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start server: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), CoreError> {
    let app_state = Arc::new(AppState::init(options).await?);

    init_presence_worker(
        options.presence_sweep.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_upload_gc_worker(
        options.upload_gc.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_watchdog_worker(
        options.watchdog.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_http_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(())
}

fn init_presence_worker(
    options: presence::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoreError> {
    info!("Initializing presence sweep worker...");

    let registry = app_state.registry.clone();
    let device_list_cache = app_state.caches.device_list.clone();

    let handle = tokio::spawn(async move {
        presence::run(
            &options,
            registry.as_ref(),
            device_list_cache.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_presence_worker_handle(handle)
}

fn init_upload_gc_worker(
    options: upload_gc::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoreError> {
    info!("Initializing upload GC worker...");

    let assembler = app_state.assembler.clone();

    let handle = tokio::spawn(async move {
        upload_gc::run(
            &options,
            assembler.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_upload_gc_worker_handle(handle)
}

fn init_watchdog_worker(
    options: watchdog::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoreError> {
    info!("Initializing deployment watchdog...");

    let orchestrator = app_state.orchestrator.clone();

    let handle = tokio::spawn(async move {
        watchdog::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_watchdog_worker_handle(handle)
}

async fn init_http_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoreError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.as_ref(), options.admin_token.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_http_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    http_server_handle: Option<JoinHandle<Result<(), CoreError>>>,
    presence_worker_handle: Option<JoinHandle<()>>,
    upload_gc_worker_handle: Option<JoinHandle<()>>,
    watchdog_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            http_server_handle: None,
            presence_worker_handle: None,
            upload_gc_worker_handle: None,
            watchdog_worker_handle: None,
        }
    }

    pub fn with_presence_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), CoreError> {
        if self.presence_worker_handle.is_some() {
            return Err(CoreError::Internal("presence_handle already set".to_string()));
        }
        self.presence_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_upload_gc_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), CoreError> {
        if self.upload_gc_worker_handle.is_some() {
            return Err(CoreError::Internal("upload_gc_handle already set".to_string()));
        }
        self.upload_gc_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_watchdog_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), CoreError> {
        if self.watchdog_worker_handle.is_some() {
            return Err(CoreError::Internal("watchdog_handle already set".to_string()));
        }
        self.watchdog_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_http_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), CoreError>>,
    ) -> Result<(), CoreError> {
        if self.http_server_handle.is_some() {
            return Err(CoreError::Internal("server_handle already set".to_string()));
        }
        self.http_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), CoreError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), CoreError> {
        info!("Shutting down fleetd...");

        // 1. Presence worker
        if let Some(handle) = self.presence_worker_handle.take() {
            handle.await.map_err(|e| CoreError::Internal(e.to_string()))?;
        }

        // 2. Upload GC worker
        if let Some(handle) = self.upload_gc_worker_handle.take() {
            handle.await.map_err(|e| CoreError::Internal(e.to_string()))?;
        }

        // 3. Watchdog
        if let Some(handle) = self.watchdog_worker_handle.take() {
            handle.await.map_err(|e| CoreError::Internal(e.to_string()))?;
        }

        // 4. HTTP server
        if let Some(handle) = self.http_server_handle.take() {
            handle.await.map_err(|e| CoreError::Internal(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
