use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use orchestrator_core::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Release pipeline orchestrator")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Config file path (defaults to config/orchestrator.toml when present)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Components to run")
                .value_parser(["dispatcher", "api", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level, overrides observability.log_level")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log format, overrides observability.log_format")
                .value_parser(["json", "pretty"]),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_path = matches.get_one::<String>("config").map(String::as_str);

    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("failed to load config file {path}"),
        None => "failed to load configuration".to_string(),
    })?;

    let (log_level, log_format) = logging_options(&matches, &config);
    init_logging(&log_level, &log_format)?;

    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");
    let app_mode = parse_app_mode(mode_str, &config)?;

    info!(mode = mode_str, config = ?config_path, "starting release orchestrator");

    let app = Arc::new(Application::new(config, app_mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("orchestrator failed: {:#}", e);
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = &mut app_handle => {
            warn!("orchestrator exited before a shutdown signal");
            return Ok(());
        }
    }

    info!("shutting down gracefully");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("orchestrator shut down cleanly"),
        Ok(Err(e)) => error!("orchestrator task panicked during shutdown: {e}"),
        Err(_) => warn!("shutdown timed out after {:?}, exiting", SHUTDOWN_TIMEOUT),
    }

    Ok(())
}

/// Command-line values win over the config file
fn logging_options(matches: &ArgMatches, config: &AppConfig) -> (String, String) {
    let level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.observability.log_format.clone());
    (level, format)
}

fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize JSON logging")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty logging")?,
        _ => return Err(anyhow::anyhow!("unsupported log format: {log_format}")),
    }

    Ok(())
}

fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "dispatcher" => Ok(AppMode::Dispatcher),
        "api" => {
            if !config.api.enabled {
                return Err(anyhow::anyhow!("api mode requested but api.enabled is false"));
            }
            Ok(AppMode::Api)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("unsupported mode: {mode_str}")),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let matches = cli().try_get_matches_from(["orchestrator"]).unwrap();
        assert_eq!(matches.get_one::<String>("mode").unwrap(), "all");
        assert!(matches.get_one::<String>("config").is_none());

        let (level, format) = logging_options(&matches, &AppConfig::default());
        assert_eq!(level, AppConfig::default().observability.log_level);
        assert_eq!(format, AppConfig::default().observability.log_format);
    }

    #[test]
    fn test_cli_overrides_logging() {
        let matches = cli()
            .try_get_matches_from(["orchestrator", "--log-level", "debug", "--log-format", "json"])
            .unwrap();
        let (level, format) = logging_options(&matches, &AppConfig::default());
        assert_eq!(level, "debug");
        assert_eq!(format, "json");
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(cli()
            .try_get_matches_from(["orchestrator", "--mode", "worker"])
            .is_err());
    }

    #[test]
    fn test_parse_app_mode() {
        let mut config = AppConfig::default();
        assert_eq!(parse_app_mode("dispatcher", &config).unwrap(), AppMode::Dispatcher);
        assert_eq!(parse_app_mode("all", &config).unwrap(), AppMode::All);

        config.api.enabled = false;
        assert!(parse_app_mode("api", &config).is_err());
    }
}
