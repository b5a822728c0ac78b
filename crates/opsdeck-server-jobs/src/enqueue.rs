// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsdeck_server_db::{DbError, JobRun, JobRunStatus, JobRunStore, NewJobRun};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{JobError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
	pub job_type: String,
	#[serde(default)]
	pub payload: serde_json::Value,
	#[serde(default)]
	pub priority: Option<i32>,
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub timeout_seconds: Option<u32>,
	#[serde(default)]
	pub run_after: Option<DateTime<Utc>>,
	#[serde(default)]
	pub dedupe_key: Option<String>,
	#[serde(default)]
	pub source_type: Option<String>,
	#[serde(default)]
	pub source_id: Option<String>,
	#[serde(default)]
	pub created_by_user_id: Option<String>,
}

impl EnqueueRequest {
	pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
		Self {
			job_type: job_type.into(),
			payload,
			..Default::default()
		}
	}

	pub fn with_dedupe_key(mut self, dedupe_key: impl Into<String>) -> Self {
		self.dedupe_key = Some(dedupe_key.into());
		self
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = Some(priority);
		self
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = Some(max_attempts);
		self
	}

	pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
		self.run_after = Some(run_after);
		self
	}

	pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
		self.source_type = Some(source_type.into());
		self.source_id = Some(source_id.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueueOutcome {
	pub id: String,
	pub status: JobRunStatus,
	/// False when an active run with the same dedupe key already existed.
	pub created: bool,
}

impl EnqueueOutcome {
	fn existing(run: JobRun) -> Self {
		Self {
			id: run.id,
			status: run.status,
			created: false,
		}
	}
}

/// Records deferred work. Never executes it.
#[derive(Clone)]
pub struct Enqueuer {
	runs: Arc<dyn JobRunStore>,
	default_max_attempts: u32,
}

impl Enqueuer {
	pub fn new(runs: Arc<dyn JobRunStore>, default_max_attempts: u32) -> Self {
		Self {
			runs,
			default_max_attempts,
		}
	}

	/// Reject requests that could never be inserted.
	pub fn validate(&self, request: &EnqueueRequest) -> Result<()> {
		if request.job_type.trim().is_empty() {
			return Err(JobError::InvalidRequest("job_type must not be empty".to_string()));
		}
		if request.max_attempts.unwrap_or(self.default_max_attempts) < 1 {
			return Err(JobError::InvalidRequest("max_attempts must be at least 1".to_string()));
		}
		Ok(())
	}

	#[instrument(skip(self, request), fields(job_type = %request.job_type, dedupe_key = ?request.dedupe_key))]
	pub async fn enqueue(&self, request: EnqueueRequest, now: DateTime<Utc>) -> Result<EnqueueOutcome> {
		self.validate(&request)?;
		let max_attempts = request.max_attempts.unwrap_or(self.default_max_attempts);

		if let Some(key) = request.dedupe_key.as_deref() {
			if let Some(existing) = self.runs.get_active_run_by_dedupe_key(key).await? {
				debug!(job_id = %existing.id, "active run already holds dedupe key");
				return Ok(EnqueueOutcome::existing(existing));
			}
		}

		let new = NewJobRun {
			job_type: request.job_type,
			payload: if request.payload.is_null() {
				serde_json::json!({})
			} else {
				request.payload
			},
			priority: request.priority.unwrap_or(0),
			max_attempts,
			timeout_seconds: request.timeout_seconds,
			run_after: request.run_after.unwrap_or(now),
			dedupe_key: request.dedupe_key,
			source_type: request.source_type,
			source_id: request.source_id,
			created_by_user_id: request.created_by_user_id,
		};

		match self.runs.insert_run(&new, now).await {
			Ok(run) => {
				info!(job_id = %run.id, job_type = %run.job_type, "job enqueued");
				Ok(EnqueueOutcome {
					id: run.id,
					status: run.status,
					created: true,
				})
			}
			Err(DbError::Conflict(_)) => {
				// Lost the race to a concurrent enqueue between pre-check and insert.
				let key = new.dedupe_key.as_deref().unwrap_or_default();
				let existing = self
					.runs
					.get_active_run_by_dedupe_key(key)
					.await?
					.ok_or_else(|| {
						JobError::Repository(DbError::Conflict(format!(
							"dedupe key {key} conflicted but no active run was found"
						)))
					})?;
				debug!(job_id = %existing.id, "dedupe race resolved to existing run");
				Ok(EnqueueOutcome::existing(existing))
			}
			Err(e) => Err(e.into()),
		}
	}
}
