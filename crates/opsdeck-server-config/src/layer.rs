// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, HandlersConfigLayer, JobsConfigLayer, LoggingConfigLayer};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
	#[serde(default)]
	pub handlers: Option<HandlersConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_option(&mut self.jobs, other.jobs, JobsConfigLayer::merge);
		merge_option(&mut self.handlers, other.handlers, HandlersConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_empty_layers() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer::default());
		assert!(base.jobs.is_none());
	}

	#[test]
	fn test_merge_other_overwrites_field_by_field() {
		let mut base = ServerConfigLayer {
			jobs: Some(JobsConfigLayer {
				claim_limit: Some(10),
				run_concurrency: Some(2),
				..Default::default()
			}),
			..Default::default()
		};
		let other = ServerConfigLayer {
			jobs: Some(JobsConfigLayer {
				claim_limit: Some(40),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);

		let jobs = base.jobs.unwrap();
		assert_eq!(jobs.claim_limit, Some(40));
		assert_eq!(jobs.run_concurrency, Some(2));
	}

	#[test]
	fn test_merge_adds_missing_sections() {
		let mut base = ServerConfigLayer::default();
		let other = ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite:/tmp/jobs.db".to_string()),
			}),
			..Default::default()
		};
		base.merge(other);
		assert_eq!(
			base.database.unwrap().url,
			Some("sqlite:/tmp/jobs.db".to_string())
		);
	}
}
