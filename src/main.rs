use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clipper::{
    Config, ExpiryReaper, JsonUserDirectory, MailboxService, MailboxStore, UserDirectory, WebServer,
};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = clipper::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        clipper::logging::init_console_only(&config.logging.level);
    }

    info!("Clipper - ephemeral media relay");

    if let Err(e) = run(config).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> clipper::Result<()> {
    let store = MailboxStore::new(&config.storage.media_dir)?;
    info!("Mailboxes stored under {}", store.root().display());

    let directory = JsonUserDirectory::new(&config.storage.contacts_file);
    if let Err(e) = directory.users() {
        warn!("User directory is not readable yet: {}", e);
    }
    let service = MailboxService::new(store.clone(), Arc::new(directory));

    let shutdown = CancellationToken::new();
    let reaper = ExpiryReaper::from_config(store, &config.reaper).spawn(shutdown.clone());

    let server = WebServer::new(&config, service)?;
    info!("Server configured on {}", server.addr());
    let served = server.run(shutdown_signal()).await;

    info!("Shutting down, waiting for the expiry reaper");
    shutdown.cancel();
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    match tokio::time::timeout(timeout, reaper).await {
        Ok(Ok(())) => info!("Expiry reaper stopped cleanly"),
        Ok(Err(e)) => error!("Expiry reaper task failed: {}", e),
        Err(_) => warn!("Expiry reaper did not stop within {} seconds", timeout.as_secs()),
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
