use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker_config::{ConfigLoader, TrackerConfig};
use tracker_service::api;
use tracker_service::cli::{Cli, Command};
use tracker_service::service::{read_snapshot, TrackerService};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = load_config(&cli).await?;
	let log_level = cli
		.log_level
		.clone()
		.unwrap_or_else(|| config.tracker.log_level.clone());

	// Initialize tracing
	setup_tracing(&log_level, cli.json_logs)?;

	// Handle commands
	match cli.command {
		Some(Command::Start) | None => start_service(config).await,
		Some(Command::Validate) => validate_config(&cli, &config),
		Some(Command::List) => list_transactions(&config).await,
	}
}

async fn load_config(cli: &Cli) -> Result<TrackerConfig> {
	let mut loader = ConfigLoader::new();
	if let Some(path) = &cli.config {
		loader = loader.with_file(path);
	}

	loader.load().await.context("Failed to load configuration")
}

async fn start_service(config: TrackerConfig) -> Result<()> {
	info!("Starting transaction tracker");

	let service = Arc::new(
		TrackerService::new(&config)
			.await
			.context("Failed to build tracker service")?,
	);

	// Start HTTP server
	let address = config.api.bind_address();
	let http_service = service.clone();
	let http_handle =
		tokio::spawn(async move { api::start_http_server(http_service, address).await });

	info!("Transaction tracker started");

	tokio::select! {
		_ = setup_shutdown_signal() => {
			info!("Shutdown signal received, stopping services...");
		}
		result = http_handle => {
			match result {
				Ok(Ok(())) => warn!("API server exited"),
				Ok(Err(e)) => warn!("API server failed: {}", e),
				Err(e) => warn!("API server task failed: {}", e),
			}
		}
	}

	service.shutdown().await;

	info!("Transaction tracker stopped");
	Ok(())
}

fn validate_config(cli: &Cli, config: &TrackerConfig) -> Result<()> {
	match &cli.config {
		Some(path) => info!("Configuration is valid: {:?}", path),
		None => info!("No configuration file given, defaults are valid"),
	}

	info!("Storage key: {}", config.tracker.storage_key);
	info!("Debounce window: {}ms", config.tracker.debounce_ms);
	info!("Storage backend: {}", config.storage.backend);
	if config.storage.backend != "file" {
		warn!(
			"The {} backend is not persisted across processes; `list` needs file storage",
			config.storage.backend
		);
	}
	match &config.notifier.rpc_url {
		Some(url) => info!(
			"Notifier: rpc at {} ({})",
			url, config.notifier.commitment
		),
		None => info!("Notifier: manual"),
	}
	info!("API address: {}", config.api.bind_address());

	Ok(())
}

async fn list_transactions(config: &TrackerConfig) -> Result<()> {
	let transactions = read_snapshot(config)
		.await?
		.map(|snapshot| snapshot.transactions)
		.unwrap_or_default();

	println!("{}", serde_json::to_string_pretty(&transactions)?);
	Ok(())
}

fn setup_tracing(log_level: &str, json: bool) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	let registry = tracing_subscriber::registry().with(env_filter);
	let result = if json {
		registry
			.with(tracing_subscriber::fmt::layer().json())
			.try_init()
	} else {
		registry.with(tracing_subscriber::fmt::layer()).try_init()
	};

	result.context("Failed to initialize tracing")
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			warn!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				warn!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
