// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Location of the SQLite job store.

use serde::Deserialize;

const SQLITE_SCHEME: &str = "sqlite:";
const DEFAULT_DATABASE_URL: &str = "sqlite:./opsdeck.db";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
	/// Always a `sqlite:` URL once finalized.
	pub url: String,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

impl DatabaseConfig {
	/// Every runner must open the same file for claims to stay exclusive,
	/// so in-memory stores are refused outside tests.
	pub fn validate(&self) -> Result<(), String> {
		let target = self.url.strip_prefix(SQLITE_SCHEME).unwrap_or_default();
		let target = target.trim_start_matches("//");
		if target.trim().is_empty() {
			return Err("database.url must name a SQLite database file".to_string());
		}
		if target.starts_with(":memory:") || target.contains("mode=memory") {
			return Err(format!(
				"database.url {} is in-memory; concurrent invocations would not share it",
				self.url
			));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	/// A `sqlite:` URL or a bare filesystem path.
	#[serde(default)]
	pub url: Option<String>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		let url = match self.url.map(|u| u.trim().to_string()) {
			Some(url) if url.starts_with(SQLITE_SCHEME) => url,
			Some(path) if !path.is_empty() => format!("{SQLITE_SCHEME}{path}"),
			_ => DEFAULT_DATABASE_URL.to_string(),
		};
		DatabaseConfig { url }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn resolve(url: &str) -> DatabaseConfig {
		DatabaseConfigLayer {
			url: Some(url.to_string()),
		}
		.finalize()
	}

	#[test]
	fn test_default_url_is_a_local_file() {
		let config = DatabaseConfig::default();
		assert_eq!(config.url, "sqlite:./opsdeck.db");
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_bare_paths_gain_sqlite_scheme() {
		assert_eq!(resolve("/var/lib/opsdeck/jobs.db").url, "sqlite:/var/lib/opsdeck/jobs.db");
		assert_eq!(resolve("sqlite:///srv/jobs.db").url, "sqlite:///srv/jobs.db");
		assert_eq!(resolve("   ").url, "sqlite:./opsdeck.db");
	}

	#[test]
	fn test_in_memory_store_is_rejected() {
		assert!(resolve("sqlite::memory:").validate().is_err());
		assert!(resolve("sqlite:file:jobs?mode=memory&cache=shared").validate().is_err());
		assert!(resolve("sqlite:").validate().is_err());
		assert!(resolve("sqlite:///srv/jobs.db").validate().is_ok());
	}
}
