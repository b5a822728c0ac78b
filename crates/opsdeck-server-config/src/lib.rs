// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the opsdeck job runner.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables (`OPSDECK_SERVER_*`)
//! 2. Config file (`/etc/opsdeck/server.toml` or an explicit path)
//! 3. Built-in defaults
//!
//! ```ignore
//! let config = opsdeck_server_config::load_config()?;
//! println!("claiming up to {} runs per tick", config.jobs.claim_limit);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub jobs: JobsConfig,
	pub handlers: HandlersConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path in place of the system one.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let handlers = layer.handlers.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&database, &jobs, &handlers)?;

	info!(
		database = %database.url,
		claim_limit = jobs.claim_limit,
		run_concurrency = jobs.run_concurrency,
		stale_after_minutes = jobs.stale_after_minutes,
		handlers_base_url = %handlers.base_url,
		handlers_auth = handlers.auth_token.is_some(),
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		jobs,
		handlers,
		logging,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(
	database: &DatabaseConfig,
	jobs: &JobsConfig,
	handlers: &HandlersConfig,
) -> Result<(), ConfigError> {
	database.validate().map_err(ConfigError::Validation)?;
	jobs.validate().map_err(ConfigError::Validation)?;

	if handlers.base_url.trim().is_empty() {
		return Err(ConfigError::Validation(
			"handlers.base_url must not be empty".to_string(),
		));
	}
	if handlers.request_timeout_secs == 0 {
		return Err(ConfigError::Validation(
			"handlers.request_timeout_secs must be at least 1".to_string(),
		));
	}

	Ok(())
}
