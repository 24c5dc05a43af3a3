// tracker-config/src/lib.rs

use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration file formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
	Toml,
	Json,
	Yaml,
}

impl ConfigFormat {
	pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Ok(Self::Toml),
			Some("json") => Ok(Self::Json),
			Some("yaml") | Some("yml") => Ok(Self::Yaml),
			_ => Err(ConfigError::ParseError(format!(
				"Unsupported config format: {:?}",
				path
			))),
		}
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "TRACKER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_path_buf());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	/// Loads the configuration file, or the defaults when no file is set,
	/// then applies environment overrides and validates the result.
	pub async fn load(&self) -> Result<TrackerConfig, ConfigError> {
		let mut config = match &self.file_path {
			Some(path) => self.load_from_file(path).await?,
			None => {
				debug!("No configuration file specified, using defaults");
				TrackerConfig::default()
			}
		};

		self.apply_env_overrides(&mut config, |name| env::var(name).ok())?;
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, path: &Path) -> Result<TrackerConfig, ConfigError> {
		info!("Loading configuration from {:?}", path);

		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(path.display().to_string()));
			}
			Err(e) => return Err(e.into()),
		};

		let substituted = substitute_env_vars(&content, |name| env::var(name).ok())?;
		parse_config(&substituted, ConfigFormat::from_path(path)?)
	}

	/// Applies `<prefix>LOG_LEVEL`, `<prefix>API_PORT`, `<prefix>RPC_URL` and
	/// `<prefix>STORAGE_PATH` as resolved by `lookup`.
	pub fn apply_env_overrides<F>(
		&self,
		config: &mut TrackerConfig,
		lookup: F,
	) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(&format!("{}{}", self.env_prefix, name));

		if let Some(log_level) = var("LOG_LEVEL") {
			debug!("Overriding log level from environment");
			config.tracker.log_level = log_level;
		}

		if let Some(port) = var("API_PORT") {
			config.api.port = port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid API port: {}", e)))?;
		}

		if let Some(rpc_url) = var("RPC_URL") {
			debug!("Overriding RPC URL from environment");
			config.notifier.rpc_url = Some(rpc_url);
		}

		if let Some(path) = var("STORAGE_PATH") {
			config.storage.path = Some(PathBuf::from(path));
		}

		Ok(())
	}
}

/// Parses configuration text in the given format.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<TrackerConfig, ConfigError> {
	match format {
		ConfigFormat::Toml => {
			toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
		ConfigFormat::Json => {
			serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
		ConfigFormat::Yaml => {
			serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
	}
}

/// Replaces every `${VAR_NAME}` in `content` with the value from `lookup`.
pub fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let value =
			lookup(var_name).ok_or_else(|| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &value);
	}

	Ok(result)
}

/// Checks cross-field constraints serde cannot express.
pub fn validate_config(config: &TrackerConfig) -> Result<(), ConfigError> {
	if config.tracker.storage_key.trim().is_empty() {
		return Err(ConfigError::ValidationError(
			"Storage key must not be empty".to_string(),
		));
	}

	if config.tracker.debounce_ms == 0 {
		return Err(ConfigError::ValidationError(
			"Debounce window must be greater than zero".to_string(),
		));
	}

	if config.tracker.event_capacity == 0 {
		return Err(ConfigError::ValidationError(
			"Event capacity must be greater than zero".to_string(),
		));
	}

	if !STORAGE_BACKENDS.contains(&config.storage.backend.as_str()) {
		return Err(ConfigError::ValidationError(format!(
			"Unknown storage backend '{}', expected one of {:?}",
			config.storage.backend, STORAGE_BACKENDS
		)));
	}

	if config.storage.backend == "file" {
		if config.storage.path.is_none() {
			return Err(ConfigError::ValidationError(
				"File storage requires a path".to_string(),
			));
		}
		if config.storage.poll_interval_ms == 0 {
			return Err(ConfigError::ValidationError(
				"Storage poll interval must be greater than zero".to_string(),
			));
		}
	}

	if !COMMITMENTS.contains(&config.notifier.commitment.as_str()) {
		return Err(ConfigError::ValidationError(format!(
			"Unknown commitment '{}', expected one of {:?}",
			config.notifier.commitment, COMMITMENTS
		)));
	}

	if let Some(url) = &config.notifier.rpc_url {
		if !(url.starts_with("http://") || url.starts_with("https://")) {
			return Err(ConfigError::ValidationError(format!(
				"RPC URL must use http or https: {}",
				url
			)));
		}
		if config.notifier.poll_interval_ms == 0 {
			return Err(ConfigError::ValidationError(
				"Notifier poll interval must be greater than zero".to_string(),
			));
		}
	}

	Ok(())
}
