// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, HandlersConfigLayer, JobsConfigLayer, LogFormat, LoggingConfigLayer,
};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/opsdeck/server.toml";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new(SYSTEM_CONFIG_PATH)
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: OPSDECK_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_from_lookup(&|name| std::env::var(name).ok())
	}
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Build a layer from any variable lookup; unset and empty variables are skipped.
pub(crate) fn load_from_lookup(lookup: Lookup<'_>) -> Result<ServerConfigLayer, ConfigError> {
	Ok(ServerConfigLayer {
		database: Some(DatabaseConfigLayer {
			url: var(lookup, "OPSDECK_SERVER_DATABASE_URL"),
		}),
		jobs: Some(load_jobs(lookup)?),
		handlers: Some(HandlersConfigLayer {
			base_url: var(lookup, "OPSDECK_SERVER_HANDLERS_BASE_URL"),
			request_timeout_secs: parsed(lookup, "OPSDECK_SERVER_HANDLERS_REQUEST_TIMEOUT_SECS")?,
			auth_token: var(lookup, "OPSDECK_SERVER_HANDLERS_AUTH_TOKEN"),
		}),
		logging: Some(LoggingConfigLayer {
			level: var(lookup, "OPSDECK_SERVER_LOG_LEVEL"),
			format: parsed::<LogFormat>(lookup, "OPSDECK_SERVER_LOG_FORMAT")?,
		}),
	})
}

fn load_jobs(lookup: Lookup<'_>) -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		claim_limit: parsed(lookup, "OPSDECK_SERVER_JOBS_CLAIM_LIMIT")?,
		run_concurrency: parsed(lookup, "OPSDECK_SERVER_JOBS_RUN_CONCURRENCY")?,
		stale_after_minutes: parsed(lookup, "OPSDECK_SERVER_JOBS_STALE_AFTER_MINUTES")?,
		default_max_attempts: parsed(lookup, "OPSDECK_SERVER_JOBS_DEFAULT_MAX_ATTEMPTS")?,
		default_timeout_secs: parsed(lookup, "OPSDECK_SERVER_JOBS_DEFAULT_TIMEOUT_SECS")?,
		retry_base_delay_secs: parsed(lookup, "OPSDECK_SERVER_JOBS_RETRY_BASE_DELAY_SECS")?,
		retry_max_delay_secs: parsed(lookup, "OPSDECK_SERVER_JOBS_RETRY_MAX_DELAY_SECS")?,
		schedule_batch_limit: parsed(lookup, "OPSDECK_SERVER_JOBS_SCHEDULE_BATCH_LIMIT")?,
		watch_interval_secs: parsed(lookup, "OPSDECK_SERVER_JOBS_WATCH_INTERVAL_SECS")?,
	})
}

fn var(lookup: Lookup<'_>, name: &str) -> Option<String> {
	lookup(name).filter(|s| !s.is_empty())
}

fn parsed<T>(lookup: Lookup<'_>, name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match var(lookup, name) {
		Some(v) => v.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}': {e}"),
		}),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| map.get(name).cloned()
	}

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.jobs.is_none());
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/server.toml").load().unwrap();
		assert!(layer.jobs.is_none());
	}

	#[test]
	fn test_toml_source_reads_sections() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("server.toml");
		std::fs::write(
			&path,
			"[jobs]\nclaim_limit = 7\n\n[handlers]\nbase_url = \"http://ops:9000/jobs\"\n",
		)
		.unwrap();

		let layer = TomlSource::new(&path).load().unwrap();
		assert_eq!(layer.jobs.unwrap().claim_limit, Some(7));
		assert_eq!(
			layer.handlers.unwrap().base_url,
			Some("http://ops:9000/jobs".to_string())
		);
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("server.toml");
		std::fs::write(&path, "[jobs\nclaim_limit = ").unwrap();

		let err = TomlSource::new(&path).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_env_lookup_parses_values() {
		let lookup = lookup_from(&[
			("OPSDECK_SERVER_DATABASE_URL", "sqlite:/data/jobs.db"),
			("OPSDECK_SERVER_JOBS_CLAIM_LIMIT", "12"),
			("OPSDECK_SERVER_JOBS_STALE_AFTER_MINUTES", ""),
			("OPSDECK_SERVER_LOG_FORMAT", "json"),
		]);
		let layer = load_from_lookup(&lookup).unwrap();

		assert_eq!(
			layer.database.unwrap().url,
			Some("sqlite:/data/jobs.db".to_string())
		);
		let jobs = layer.jobs.unwrap();
		assert_eq!(jobs.claim_limit, Some(12));
		assert!(jobs.stale_after_minutes.is_none());
		assert_eq!(layer.logging.unwrap().format, Some(LogFormat::Json));
	}

	#[test]
	fn test_env_lookup_rejects_garbage() {
		let lookup = lookup_from(&[("OPSDECK_SERVER_JOBS_RUN_CONCURRENCY", "lots")]);
		let err = load_from_lookup(&lookup).unwrap_err();
		assert!(
			matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "OPSDECK_SERVER_JOBS_RUN_CONCURRENCY")
		);
	}
}
