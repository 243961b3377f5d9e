//! Tripwire engine
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - TRIPWIRE_CONFIG: Config file (default: config.yml, built-in defaults if absent)
//! - TRIPWIRE_ONCE: Run every script once, then exit (code 1 if any run failed)
//! - TRIPWIRE_SCRIPT: Run only this script file
//! - TRIPWIRE_API_ADDRESS: Serve the management API on this address
//! - TRIPWIRE_LOG_LEVEL: Log level for the engine (default: info)
//! - RUST_LOG: Full log filter, overrides TRIPWIRE_LOG_LEVEL

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripwire::alerts::{AlertManager, Message};
use tripwire::api::{run_server, AppState};
use tripwire::channels::ChannelRegistry;
use tripwire::config::Config;
use tripwire::datasource::DataSourceRegistry;
use tripwire::modules::{
    AlertModule, ChartModule, DataSourceModule, HttpModule, KvModule, LogModule, Module,
    RuntimeModule,
};
use tripwire::runner::{Runner, RunnerConfig};
use tripwire::script::load_scripts;
use tripwire::storage::StorageManager;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logging
    let default_filter = std::env::var("TRIPWIRE_LOG_LEVEL")
        .map(|level| format!("tripwire={level},tower_http={level}"))
        .unwrap_or_else(|_| "tripwire=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, flags) = Config::from_env()?;
    let scripts = load_scripts(&config.scripts.sources)?;

    tracing::info!("Tripwire configuration:");
    tracing::info!("  Scripts: {}", scripts.len());
    tracing::info!("  Update interval: {:?}", config.scripts.update_interval);
    tracing::info!("  Overlap policy: {:?}", config.scripts.overlap);
    tracing::info!(
        "  Storages: alert={}, kv={}",
        config.global.storages.alert,
        config.global.storages.kv
    );
    tracing::info!("  Once: {}", flags.once);

    let storages = StorageManager::from_config(&config.storages.core).await?;
    let alert_storage = storages.get(&config.global.storages.alert)?;
    let kv_storage = storages.get(&config.global.storages.kv)?;

    let channels = Arc::new(ChannelRegistry::from_config(&config.channels)?);
    let datasources = DataSourceRegistry::from_config(&config.datasources)?;
    let manager = Arc::new(AlertManager::new(alert_storage.alert(), Arc::clone(&channels)));

    let mut modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(AlertModule::new(Arc::clone(&manager))),
        Arc::new(KvModule::new(kv_storage.kv())),
        Arc::new(LogModule),
        Arc::new(ChartModule),
        Arc::new(HttpModule::new()?),
        Arc::new(RuntimeModule::new(flags.once, config.global.log_level.clone())),
    ];
    modules.extend(DataSourceModule::modules_for(&datasources));

    let runner = Arc::new(Runner::new(
        scripts,
        RunnerConfig::from(&config.scripts),
        modules,
    )?);

    if !config.global.send_start_notification.is_empty() {
        channels
            .send(
                &Message::notice("tripwire start"),
                &config.global.send_start_notification,
            )
            .await;
    }

    let cancel = CancellationToken::new();

    let api_handle = config.global.api.as_ref().map(|api| {
        let address = api.address.clone();
        let state = Arc::new(AppState {
            runner: Arc::clone(&runner),
            alerts: Arc::clone(&manager),
        });
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(&address, state, shutdown).await {
                tracing::error!(address = %address, error = %e, "API server failed");
            }
        })
    });

    let mut exit = ExitCode::SUCCESS;
    if flags.once {
        if let Some(summary) = Arc::clone(&runner).watch(cancel.clone(), true).await {
            if !summary.is_success() {
                exit = ExitCode::FAILURE;
            }
        }
    } else {
        let watch = tokio::spawn(Arc::clone(&runner).watch(cancel.clone(), false));
        shutdown_signal().await;
        cancel.cancel();
        if let Err(e) = watch.await {
            tracing::error!(error = %e, "Runner task failed");
        }
    }

    cancel.cancel();
    runner.stop().await;

    if !config.global.send_stop_notification.is_empty() {
        channels
            .send(
                &Message::notice("tripwire stop"),
                &config.global.send_stop_notification,
            )
            .await;
    }

    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "API server task failed");
        }
    }
    storages.stop().await;

    tracing::info!("Tripwire stopped");
    Ok(exit)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, stopping runner...");
}
