//! fleetd - Entry Point
//!
//! Fleet management backend for Android device pools: device presence,
//! chunked APK uploads, content-addressed artifact storage, and
//! deployment orchestration with a dashboard event stream.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use fleetd::app::options::{AppOptions, ServerOptions, StorageOptions};
use fleetd::app::run::run;
use fleetd::app::settings::Settings;
use fleetd::logs::{init_logging, LogOptions};
use fleetd::registry::registry::PresencePolicy;
use fleetd::upload::assembler::UploadOptions;
use fleetd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Retrieve the settings file, if one was given
    let mut settings = match cli_args.get("config") {
        Some(path) => match Settings::load(Path::new(path)).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return;
            }
        },
        None => Settings::default(),
    };

    // CLI flags override the settings file
    if let Some(host) = cli_args.get("host") {
        settings.host = host.clone();
    }
    if let Some(port) = cli_args.get("port") {
        match port.parse() {
            Ok(port) => settings.port = port,
            Err(_) => {
                eprintln!("Invalid port: {}", port);
                return;
            }
        }
    }
    if let Some(level) = cli_args.get("log-level") {
        match level.parse() {
            Ok(level) => settings.log_level = level,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        }
    }
    if let Some(token) = cli_args.get("admin-token") {
        settings.admin_token = Some(token.clone());
    }
    if let Some(dir) = cli_args.get("artifact-dir") {
        settings.artifact_dir = PathBuf::from(dir);
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // The admin token comes from the settings file, flag, or environment
    let admin_token = settings
        .admin_token
        .clone()
        .or_else(|| env::var("FLEETD_ADMIN_TOKEN").ok())
        .unwrap_or_default();
    if admin_token.trim().is_empty() {
        error!("No admin token configured");
        error!("Set admin_token in the settings file, pass --admin-token=<token>, or set FLEETD_ADMIN_TOKEN");
        return;
    }

    // Run the server
    let options = AppOptions {
        server: ServerOptions {
            host: settings.host.clone(),
            port: settings.port,
        },
        admin_token,
        storage: StorageOptions {
            artifact_dir: settings.artifact_dir.clone(),
        },
        presence: PresencePolicy {
            presence_timeout: chrono::Duration::seconds(settings.presence_timeout_secs as i64),
            min_beat_interval: chrono::Duration::seconds(settings.min_beat_interval_secs as i64),
            ..Default::default()
        },
        uploads: UploadOptions {
            retention: chrono::Duration::hours(settings.upload_retention_hours as i64),
        },
        ..Default::default()
    };

    info!("Running fleetd {} on {}:{}", version.version, options.server.host, options.server.port);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the server: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to listen for SIGINT");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
