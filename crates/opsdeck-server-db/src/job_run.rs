// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `job_runs` table: one row per unit of deferred work.
//!
//! Every mutation that changes `status` is a conditional update keyed on the
//! row's current status (and, for running rows, on the lease owner). Callers
//! learn whether they won the race from the boolean return value.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::time::{format_ts, parse_opt_ts, parse_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
	Queued,
	Running,
	Succeeded,
	Failed,
	Canceled,
	DeadLetter,
}

impl JobRunStatus {
	pub const ALL: [JobRunStatus; 6] = [
		JobRunStatus::Queued,
		JobRunStatus::Running,
		JobRunStatus::Succeeded,
		JobRunStatus::Failed,
		JobRunStatus::Canceled,
		JobRunStatus::DeadLetter,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			JobRunStatus::Queued => "queued",
			JobRunStatus::Running => "running",
			JobRunStatus::Succeeded => "succeeded",
			JobRunStatus::Failed => "failed",
			JobRunStatus::Canceled => "canceled",
			JobRunStatus::DeadLetter => "dead_letter",
		}
	}

	/// Terminal rows never block a re-enqueue under the same dedupe key.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, JobRunStatus::Queued | JobRunStatus::Running)
	}
}

impl std::fmt::Display for JobRunStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for JobRunStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"queued" => Ok(JobRunStatus::Queued),
			"running" => Ok(JobRunStatus::Running),
			"succeeded" => Ok(JobRunStatus::Succeeded),
			"failed" => Ok(JobRunStatus::Failed),
			"canceled" => Ok(JobRunStatus::Canceled),
			"dead_letter" => Ok(JobRunStatus::DeadLetter),
			_ => Err(format!("unknown job run status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_type: String,
	pub payload: serde_json::Value,
	pub priority: i32,
	pub status: JobRunStatus,
	pub attempts: u32,
	pub max_attempts: u32,
	pub run_after: DateTime<Utc>,
	pub locked_at: Option<DateTime<Utc>>,
	pub lock_owner: Option<String>,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
	pub timeout_seconds: Option<u32>,
	pub dedupe_key: Option<String>,
	pub error_message: Option<String>,
	pub error_code: Option<String>,
	pub dead_lettered_at: Option<DateTime<Utc>>,
	pub source_type: Option<String>,
	pub source_id: Option<String>,
	pub created_by_user_id: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl JobRun {
	pub fn has_attempts_left(&self) -> bool {
		self.attempts < self.max_attempts
	}
}

/// Values supplied when inserting a new row; everything else is defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobRun {
	pub job_type: String,
	pub payload: serde_json::Value,
	pub priority: i32,
	pub max_attempts: u32,
	pub timeout_seconds: Option<u32>,
	pub run_after: DateTime<Utc>,
	pub dedupe_key: Option<String>,
	pub source_type: Option<String>,
	pub source_id: Option<String>,
	pub created_by_user_id: Option<String>,
}

/// How a runner resolves a row it holds the lease on.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResolution {
	Succeeded,
	Canceled,
	Retry {
		run_after: DateTime<Utc>,
		error_message: String,
		error_code: String,
	},
	DeadLetter {
		error_message: String,
		error_code: String,
	},
}

/// How stale-lock recovery resolves an abandoned running row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleResolution {
	Requeue,
	DeadLetter,
}

const STALE_ERROR_CODE: &str = "stale_lock";
const STALE_ERROR_MESSAGE: &str = "lock expired before the runner reported an outcome";

const SELECT_COLUMNS: &str = r#"
	SELECT id, job_type, payload, priority, status, attempts, max_attempts,
	       run_after, locked_at, lock_owner, started_at, finished_at, timeout_seconds,
	       dedupe_key, error_message, error_code, dead_lettered_at,
	       source_type, source_id, created_by_user_id, created_at, updated_at
	FROM job_runs
"#;

#[derive(sqlx::FromRow)]
struct JobRunRow {
	id: String,
	job_type: String,
	payload: String,
	priority: i64,
	status: String,
	attempts: i64,
	max_attempts: i64,
	run_after: String,
	locked_at: Option<String>,
	lock_owner: Option<String>,
	started_at: Option<String>,
	finished_at: Option<String>,
	timeout_seconds: Option<i64>,
	dedupe_key: Option<String>,
	error_message: Option<String>,
	error_code: Option<String>,
	dead_lettered_at: Option<String>,
	source_type: Option<String>,
	source_id: Option<String>,
	created_by_user_id: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<JobRunRow> for JobRun {
	type Error = DbError;

	fn try_from(row: JobRunRow) -> Result<Self> {
		Ok(JobRun {
			id: row.id,
			job_type: row.job_type,
			payload: serde_json::from_str(&row.payload)?,
			priority: row.priority as i32,
			status: row.status.parse().map_err(DbError::Internal)?,
			attempts: row.attempts.max(0) as u32,
			max_attempts: row.max_attempts.max(0) as u32,
			run_after: parse_ts(&row.run_after)?,
			locked_at: parse_opt_ts(row.locked_at)?,
			lock_owner: row.lock_owner,
			started_at: parse_opt_ts(row.started_at)?,
			finished_at: parse_opt_ts(row.finished_at)?,
			timeout_seconds: row.timeout_seconds.map(|t| t.max(0) as u32),
			dedupe_key: row.dedupe_key,
			error_message: row.error_message,
			error_code: row.error_code,
			dead_lettered_at: parse_opt_ts(row.dead_lettered_at)?,
			source_type: row.source_type,
			source_id: row.source_id,
			created_by_user_id: row.created_by_user_id,
			created_at: parse_ts(&row.created_at)?,
			updated_at: parse_ts(&row.updated_at)?,
		})
	}
}

#[derive(Clone)]
pub struct JobRunRepository {
	pool: SqlitePool,
}

impl JobRunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert a new `queued` row.
	///
	/// # Errors
	/// Returns `DbError::Conflict` when another non-terminal row already holds
	/// the same dedupe key.
	#[tracing::instrument(skip(self, new), fields(job_type = %new.job_type))]
	pub async fn insert_run(&self, new: &NewJobRun, now: DateTime<Utc>) -> Result<JobRun> {
		let id = uuid::Uuid::new_v4().to_string();
		let now_str = format_ts(now);
		let payload = serde_json::to_string(&new.payload)?;

		let result = sqlx::query(
			r#"
			INSERT INTO job_runs (
				id, job_type, payload, priority, status, attempts, max_attempts,
				run_after, timeout_seconds, dedupe_key,
				source_type, source_id, created_by_user_id, created_at, updated_at
			)
			VALUES (?, ?, ?, ?, 'queued', 0, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&id)
		.bind(&new.job_type)
		.bind(payload)
		.bind(new.priority as i64)
		.bind(new.max_attempts as i64)
		.bind(format_ts(new.run_after))
		.bind(new.timeout_seconds.map(i64::from))
		.bind(&new.dedupe_key)
		.bind(&new.source_type)
		.bind(&new.source_id)
		.bind(&new.created_by_user_id)
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await
		.map_err(DbError::from);

		match result {
			Ok(_) => {}
			Err(e) if e.is_unique_violation() => {
				return Err(DbError::Conflict(format!(
					"active job run exists for dedupe key {}",
					new.dedupe_key.as_deref().unwrap_or_default()
				)));
			}
			Err(e) => return Err(e),
		}

		self
			.get_run(&id)
			.await?
			.ok_or_else(|| DbError::Internal(format!("inserted job run {id} not readable")))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, JobRunRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(TryInto::try_into).transpose()
	}

	/// The queued or running row holding `dedupe_key`, if any.
	#[tracing::instrument(skip(self))]
	pub async fn get_active_run_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, JobRunRow>(&format!(
			"{SELECT_COLUMNS} WHERE dedupe_key = ? AND status IN ('queued', 'running') LIMIT 1"
		))
		.bind(dedupe_key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_runs(&self, status: Option<JobRunStatus>, limit: u32) -> Result<Vec<JobRun>> {
		let rows = match status {
			Some(status) => {
				sqlx::query_as::<_, JobRunRow>(&format!(
					"{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at DESC LIMIT ?"
				))
				.bind(status.as_str())
				.bind(limit as i64)
				.fetch_all(&self.pool)
				.await?
			}
			None => {
				sqlx::query_as::<_, JobRunRow>(&format!(
					"{SELECT_COLUMNS} ORDER BY created_at DESC LIMIT ?"
				))
				.bind(limit as i64)
				.fetch_all(&self.pool)
				.await?
			}
		};

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Ids of queued rows whose `run_after` has passed, in claim order.
	#[tracing::instrument(skip(self))]
	pub async fn list_claimable_ids(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>> {
		let ids = sqlx::query_scalar::<_, String>(
			r#"
			SELECT id FROM job_runs
			WHERE status = 'queued' AND run_after <= ?
			ORDER BY priority DESC, created_at ASC, id ASC
			LIMIT ?
			"#,
		)
		.bind(format_ts(now))
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		Ok(ids)
	}

	/// Compare-and-swap `queued → running` under `runner_id`'s lease.
	///
	/// Returns `false` when the row was no longer queued (another runner won).
	#[tracing::instrument(skip(self))]
	pub async fn try_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool> {
		let now_str = format_ts(now);
		let result = sqlx::query(
			r#"
			UPDATE job_runs
			SET status = 'running',
			    locked_at = ?,
			    lock_owner = ?,
			    started_at = ?,
			    finished_at = NULL,
			    attempts = attempts + 1,
			    updated_at = ?
			WHERE id = ? AND status = 'queued' AND run_after <= ?
			"#,
		)
		.bind(&now_str)
		.bind(runner_id)
		.bind(&now_str)
		.bind(&now_str)
		.bind(id)
		.bind(&now_str)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Undo a claim that was never dispatched, restoring the attempt counter.
	#[tracing::instrument(skip(self))]
	pub async fn release_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_runs
			SET status = 'queued',
			    locked_at = NULL,
			    lock_owner = NULL,
			    started_at = NULL,
			    attempts = MAX(attempts - 1, 0),
			    updated_at = ?
			WHERE id = ? AND status = 'running' AND lock_owner = ?
			"#,
		)
		.bind(format_ts(now))
		.bind(id)
		.bind(runner_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Record the outcome of a run held by `runner_id`.
	///
	/// Returns `false` when the lease was lost (recovered or canceled meanwhile).
	#[tracing::instrument(skip(self, resolution))]
	pub async fn resolve_run(
		&self,
		id: &str,
		runner_id: &str,
		resolution: &RunResolution,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let now_str = format_ts(now);
		let query = match resolution {
			RunResolution::Succeeded => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'succeeded', finished_at = ?, locked_at = NULL, lock_owner = NULL,
				    error_message = NULL, error_code = NULL, updated_at = ?
				WHERE id = ? AND status = 'running' AND lock_owner = ?
				"#,
			)
			.bind(now_str.clone())
			.bind(now_str),
			RunResolution::Canceled => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'canceled', finished_at = ?, locked_at = NULL, lock_owner = NULL,
				    updated_at = ?
				WHERE id = ? AND status = 'running' AND lock_owner = ?
				"#,
			)
			.bind(now_str.clone())
			.bind(now_str),
			RunResolution::Retry {
				run_after,
				error_message,
				error_code,
			} => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'queued', run_after = ?, locked_at = NULL, lock_owner = NULL,
				    error_message = ?, error_code = ?, updated_at = ?
				WHERE id = ? AND status = 'running' AND lock_owner = ?
				"#,
			)
			.bind(format_ts(*run_after))
			.bind(error_message.clone())
			.bind(error_code.clone())
			.bind(now_str),
			RunResolution::DeadLetter {
				error_message,
				error_code,
			} => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'dead_letter', dead_lettered_at = ?, finished_at = ?,
				    locked_at = NULL, lock_owner = NULL,
				    error_message = ?, error_code = ?, updated_at = ?
				WHERE id = ? AND status = 'running' AND lock_owner = ?
				"#,
			)
			.bind(now_str.clone())
			.bind(now_str.clone())
			.bind(error_message.clone())
			.bind(error_code.clone())
			.bind(now_str),
		};

		let result = query
			.bind(id)
			.bind(runner_id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Running rows whose lease is older than `cutoff`.
	#[tracing::instrument(skip(self))]
	pub async fn list_stale_runs(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<JobRun>> {
		let cutoff = format_ts(cutoff);
		let rows = sqlx::query_as::<_, JobRunRow>(&format!(
			r#"{SELECT_COLUMNS}
			WHERE status = 'running'
			  AND ((locked_at IS NOT NULL AND locked_at < ?)
			       OR (locked_at IS NULL AND started_at IS NOT NULL AND started_at < ?))
			ORDER BY COALESCE(locked_at, started_at) ASC
			LIMIT ?"#
		))
		.bind(&cutoff)
		.bind(&cutoff)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Compare-and-swap a stale running row back to `queued` or into `dead_letter`.
	///
	/// The staleness predicate is re-checked so a lease refreshed in between is
	/// left alone.
	#[tracing::instrument(skip(self))]
	pub async fn resolve_stale_run(
		&self,
		id: &str,
		cutoff: DateTime<Utc>,
		resolution: StaleResolution,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let now_str = format_ts(now);
		let cutoff = format_ts(cutoff);
		let query = match resolution {
			StaleResolution::Requeue => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'queued', run_after = ?, locked_at = NULL, lock_owner = NULL,
				    error_message = ?, error_code = ?, updated_at = ?
				WHERE id = ? AND status = 'running'
				  AND ((locked_at IS NOT NULL AND locked_at < ?)
				       OR (locked_at IS NULL AND started_at IS NOT NULL AND started_at < ?))
				"#,
			)
			.bind(now_str.clone())
			.bind(STALE_ERROR_MESSAGE)
			.bind(STALE_ERROR_CODE)
			.bind(now_str),
			StaleResolution::DeadLetter => sqlx::query(
				r#"
				UPDATE job_runs
				SET status = 'dead_letter', dead_lettered_at = ?, finished_at = ?,
				    locked_at = NULL, lock_owner = NULL,
				    error_message = ?, error_code = ?, updated_at = ?
				WHERE id = ? AND status = 'running'
				  AND ((locked_at IS NOT NULL AND locked_at < ?)
				       OR (locked_at IS NULL AND started_at IS NOT NULL AND started_at < ?))
				"#,
			)
			.bind(now_str.clone())
			.bind(now_str.clone())
			.bind(STALE_ERROR_MESSAGE)
			.bind(STALE_ERROR_CODE)
			.bind(now_str),
		};

		let result = query
			.bind(id)
			.bind(&cutoff)
			.bind(&cutoff)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Put a terminal row back in the queue with its attempt count unchanged.
	///
	/// # Errors
	/// `NotFound` for unknown ids; `Conflict` when the row is not in a
	/// requeueable state or another active row holds its dedupe key.
	#[tracing::instrument(skip(self))]
	pub async fn requeue_run(&self, id: &str, now: DateTime<Utc>) -> Result<JobRun> {
		let now_str = format_ts(now);
		let result = sqlx::query(
			r#"
			UPDATE job_runs
			SET status = 'queued', run_after = ?, locked_at = NULL, lock_owner = NULL,
			    started_at = NULL, finished_at = NULL, dead_lettered_at = NULL,
			    error_message = NULL, error_code = NULL, updated_at = ?
			WHERE id = ? AND status IN ('dead_letter', 'failed', 'canceled')
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.bind(id)
		.execute(&self.pool)
		.await
		.map_err(DbError::from);

		let rows_affected = match result {
			Ok(result) => result.rows_affected(),
			Err(e) if e.is_unique_violation() => {
				return Err(DbError::Conflict(format!(
					"another active job run holds the dedupe key of {id}"
				)));
			}
			Err(e) => return Err(e),
		};

		let run = self
			.get_run(id)
			.await?
			.ok_or_else(|| DbError::NotFound(id.to_string()))?;

		if rows_affected == 0 {
			return Err(DbError::Conflict(format!(
				"job run {id} is {} and cannot be requeued",
				run.status
			)));
		}

		Ok(run)
	}

	/// Compare-and-swap `queued | running → canceled`.
	///
	/// A running handler notices through [`JobRunRepository::is_canceled`].
	#[tracing::instrument(skip(self))]
	pub async fn cancel_run(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
		let now_str = format_ts(now);
		let result = sqlx::query(
			r#"
			UPDATE job_runs
			SET status = 'canceled', finished_at = ?, updated_at = ?
			WHERE id = ? AND status IN ('queued', 'running')
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.bind(id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self))]
	pub async fn is_canceled(&self, id: &str) -> Result<bool> {
		let status = sqlx::query_scalar::<_, String>("SELECT status FROM job_runs WHERE id = ?")
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		Ok(status.as_deref() == Some(JobRunStatus::Canceled.as_str()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_by_status(&self) -> Result<BTreeMap<JobRunStatus, i64>> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			"SELECT status, COUNT(*) FROM job_runs GROUP BY status",
		)
		.fetch_all(&self.pool)
		.await?;

		let mut counts: BTreeMap<JobRunStatus, i64> =
			JobRunStatus::ALL.iter().map(|s| (*s, 0)).collect();
		for (status, count) in rows {
			let status: JobRunStatus = status.parse().map_err(DbError::Internal)?;
			counts.insert(status, count);
		}
		Ok(counts)
	}

	/// `run_after` of the longest-waiting claimable row.
	#[tracing::instrument(skip(self))]
	pub async fn oldest_claimable_run_after(
		&self,
		now: DateTime<Utc>,
	) -> Result<Option<DateTime<Utc>>> {
		let oldest = sqlx::query_scalar::<_, Option<String>>(
			"SELECT MIN(run_after) FROM job_runs WHERE status = 'queued' AND run_after <= ?",
		)
		.bind(format_ts(now))
		.fetch_one(&self.pool)
		.await?;

		parse_opt_ts(oldest)
	}
}

#[async_trait]
pub trait JobRunStore: Send + Sync {
	async fn insert_run(&self, new: &NewJobRun, now: DateTime<Utc>) -> Result<JobRun>;
	async fn get_run(&self, id: &str) -> Result<Option<JobRun>>;
	async fn get_active_run_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<JobRun>>;
	async fn list_runs(&self, status: Option<JobRunStatus>, limit: u32) -> Result<Vec<JobRun>>;
	async fn list_claimable_ids(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>>;
	async fn try_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool>;
	async fn release_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool>;
	async fn resolve_run(
		&self,
		id: &str,
		runner_id: &str,
		resolution: &RunResolution,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn list_stale_runs(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<JobRun>>;
	async fn resolve_stale_run(
		&self,
		id: &str,
		cutoff: DateTime<Utc>,
		resolution: StaleResolution,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn requeue_run(&self, id: &str, now: DateTime<Utc>) -> Result<JobRun>;
	async fn cancel_run(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;
	async fn is_canceled(&self, id: &str) -> Result<bool>;
	async fn count_by_status(&self) -> Result<BTreeMap<JobRunStatus, i64>>;
	async fn oldest_claimable_run_after(&self, now: DateTime<Utc>)
		-> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
impl JobRunStore for JobRunRepository {
	async fn insert_run(&self, new: &NewJobRun, now: DateTime<Utc>) -> Result<JobRun> {
		self.insert_run(new, now).await
	}

	async fn get_run(&self, id: &str) -> Result<Option<JobRun>> {
		self.get_run(id).await
	}

	async fn get_active_run_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<JobRun>> {
		self.get_active_run_by_dedupe_key(dedupe_key).await
	}

	async fn list_runs(&self, status: Option<JobRunStatus>, limit: u32) -> Result<Vec<JobRun>> {
		self.list_runs(status, limit).await
	}

	async fn list_claimable_ids(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>> {
		self.list_claimable_ids(now, limit).await
	}

	async fn try_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool> {
		self.try_claim(id, runner_id, now).await
	}

	async fn release_claim(&self, id: &str, runner_id: &str, now: DateTime<Utc>) -> Result<bool> {
		self.release_claim(id, runner_id, now).await
	}

	async fn resolve_run(
		&self,
		id: &str,
		runner_id: &str,
		resolution: &RunResolution,
		now: DateTime<Utc>,
	) -> Result<bool> {
		self.resolve_run(id, runner_id, resolution, now).await
	}

	async fn list_stale_runs(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<JobRun>> {
		self.list_stale_runs(cutoff, limit).await
	}

	async fn resolve_stale_run(
		&self,
		id: &str,
		cutoff: DateTime<Utc>,
		resolution: StaleResolution,
		now: DateTime<Utc>,
	) -> Result<bool> {
		self.resolve_stale_run(id, cutoff, resolution, now).await
	}

	async fn requeue_run(&self, id: &str, now: DateTime<Utc>) -> Result<JobRun> {
		self.requeue_run(id, now).await
	}

	async fn cancel_run(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
		self.cancel_run(id, now).await
	}

	async fn is_canceled(&self, id: &str) -> Result<bool> {
		self.is_canceled(id).await
	}

	async fn count_by_status(&self) -> Result<BTreeMap<JobRunStatus, i64>> {
		self.count_by_status().await
	}

	async fn oldest_claimable_run_after(
		&self,
		now: DateTime<Utc>,
	) -> Result<Option<DateTime<Utc>>> {
		self.oldest_claimable_run_after(now).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_job_test_pool;
	use chrono::Duration;

	fn make_new_run(job_type: &str) -> NewJobRun {
		NewJobRun {
			job_type: job_type.to_string(),
			payload: serde_json::json!({"lead_id": 42}),
			priority: 0,
			max_attempts: 3,
			timeout_seconds: Some(30),
			run_after: Utc::now() - Duration::seconds(1),
			dedupe_key: None,
			source_type: Some("lead".to_string()),
			source_id: Some("42".to_string()),
			created_by_user_id: None,
		}
	}

	#[tokio::test]
	async fn test_insert_and_get_run() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);

		let run = repo
			.insert_run(&make_new_run("score_lead"), Utc::now())
			.await
			.unwrap();
		assert_eq!(run.status, JobRunStatus::Queued);
		assert_eq!(run.attempts, 0);
		assert_eq!(run.payload, serde_json::json!({"lead_id": 42}));

		let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(fetched, run);
		assert!(repo.get_run("missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_dedupe_key_unique_only_while_active() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let mut new = make_new_run("snapshot");
		new.dedupe_key = Some("snapshot:2024-01-10".to_string());

		let first = repo.insert_run(&new, now).await.unwrap();
		let second = repo.insert_run(&new, now).await;
		assert!(matches!(second, Err(DbError::Conflict(_))));

		assert!(repo.cancel_run(&first.id, now).await.unwrap());
		let third = repo.insert_run(&new, now).await.unwrap();
		assert_ne!(third.id, first.id);

		let active = repo
			.get_active_run_by_dedupe_key("snapshot:2024-01-10")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(active.id, third.id);
	}

	#[tokio::test]
	async fn test_claim_is_compare_and_swap() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let run = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		assert!(repo.try_claim(&run.id, "runner-a", now).await.unwrap());
		assert!(!repo.try_claim(&run.id, "runner-b", now).await.unwrap());

		let claimed = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(claimed.status, JobRunStatus::Running);
		assert_eq!(claimed.attempts, 1);
		assert_eq!(claimed.lock_owner.as_deref(), Some("runner-a"));
		assert!(claimed.locked_at.is_some());
	}

	#[tokio::test]
	async fn test_claim_respects_run_after() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let mut new = make_new_run("x");
		new.run_after = now + Duration::minutes(5);
		let run = repo.insert_run(&new, now).await.unwrap();

		assert!(repo.list_claimable_ids(now, 10).await.unwrap().is_empty());
		assert!(!repo.try_claim(&run.id, "runner-a", now).await.unwrap());
		assert_eq!(
			repo
				.list_claimable_ids(now + Duration::minutes(6), 10)
				.await
				.unwrap(),
			vec![run.id]
		);
	}

	#[tokio::test]
	async fn test_claimable_order_is_priority_then_age() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let base = Utc::now() - Duration::minutes(10);

		let low_old = repo
			.insert_run(&make_new_run("x"), base)
			.await
			.unwrap();
		let mut high = make_new_run("x");
		high.priority = 10;
		let high_new = repo
			.insert_run(&high, base + Duration::minutes(2))
			.await
			.unwrap();
		let low_new = repo
			.insert_run(&make_new_run("x"), base + Duration::minutes(1))
			.await
			.unwrap();

		let ids = repo.list_claimable_ids(Utc::now(), 10).await.unwrap();
		assert_eq!(ids, vec![high_new.id, low_old.id, low_new.id]);
	}

	#[tokio::test]
	async fn test_resolve_requires_lease_owner() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let run = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		repo.try_claim(&run.id, "runner-a", now).await.unwrap();

		assert!(!repo
			.resolve_run(&run.id, "runner-b", &RunResolution::Succeeded, now)
			.await
			.unwrap());
		assert!(repo
			.resolve_run(&run.id, "runner-a", &RunResolution::Succeeded, now)
			.await
			.unwrap());

		let done = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(done.status, JobRunStatus::Succeeded);
		assert!(done.finished_at.is_some());
		assert!(done.lock_owner.is_none());
	}

	#[tokio::test]
	async fn test_resolve_retry_and_dead_letter() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let run = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		repo.try_claim(&run.id, "runner-a", now).await.unwrap();
		let retry_at = now + Duration::seconds(30);
		repo
			.resolve_run(
				&run.id,
				"runner-a",
				&RunResolution::Retry {
					run_after: retry_at,
					error_message: "boom".to_string(),
					error_code: "handler_error".to_string(),
				},
				now,
			)
			.await
			.unwrap();

		let retried = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(retried.status, JobRunStatus::Queued);
		assert_eq!(retried.error_code.as_deref(), Some("handler_error"));
		assert_eq!(format_ts(retried.run_after), format_ts(retry_at));

		repo.try_claim(&run.id, "runner-b", retry_at).await.unwrap();
		repo
			.resolve_run(
				&run.id,
				"runner-b",
				&RunResolution::DeadLetter {
					error_message: "boom again".to_string(),
					error_code: "handler_error".to_string(),
				},
				retry_at,
			)
			.await
			.unwrap();

		let dead = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(dead.status, JobRunStatus::DeadLetter);
		assert_eq!(dead.attempts, 2);
		assert!(dead.dead_lettered_at.is_some());
		assert_eq!(dead.error_message.as_deref(), Some("boom again"));
	}

	#[tokio::test]
	async fn test_release_claim_restores_attempts() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let run = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		repo.try_claim(&run.id, "runner-a", now).await.unwrap();
		assert!(repo.release_claim(&run.id, "runner-a", now).await.unwrap());

		let released = repo.get_run(&run.id).await.unwrap().unwrap();
		assert_eq!(released.status, JobRunStatus::Queued);
		assert_eq!(released.attempts, 0);
		assert!(released.lock_owner.is_none());
	}

	#[tokio::test]
	async fn test_stale_runs_and_resolution() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();
		let long_ago = now - Duration::hours(2);

		let mut old_run = make_new_run("x");
		old_run.run_after = long_ago;
		let stale = repo.insert_run(&old_run, long_ago).await.unwrap();
		repo.try_claim(&stale.id, "dead-runner", long_ago).await.unwrap();
		let fresh = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		repo.try_claim(&fresh.id, "live-runner", now).await.unwrap();

		let cutoff = now - Duration::minutes(15);
		let found = repo.list_stale_runs(cutoff, 10).await.unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].id, stale.id);

		assert!(!repo
			.resolve_stale_run(&fresh.id, cutoff, StaleResolution::Requeue, now)
			.await
			.unwrap());
		assert!(repo
			.resolve_stale_run(&stale.id, cutoff, StaleResolution::Requeue, now)
			.await
			.unwrap());

		let requeued = repo.get_run(&stale.id).await.unwrap().unwrap();
		assert_eq!(requeued.status, JobRunStatus::Queued);
		assert_eq!(requeued.error_code.as_deref(), Some("stale_lock"));
		assert!(requeued.locked_at.is_none());
	}

	#[tokio::test]
	async fn test_requeue_only_from_terminal_failure_states() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let run = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		assert!(matches!(
			repo.requeue_run(&run.id, now).await,
			Err(DbError::Conflict(_))
		));
		assert!(matches!(
			repo.requeue_run("missing", now).await,
			Err(DbError::NotFound(_))
		));

		repo.try_claim(&run.id, "runner-a", now).await.unwrap();
		repo
			.resolve_run(
				&run.id,
				"runner-a",
				&RunResolution::DeadLetter {
					error_message: "boom".to_string(),
					error_code: "handler_error".to_string(),
				},
				now,
			)
			.await
			.unwrap();

		let requeued = repo.requeue_run(&run.id, now).await.unwrap();
		assert_eq!(requeued.status, JobRunStatus::Queued);
		assert_eq!(requeued.attempts, 1);
		assert!(requeued.error_message.is_none());
		assert!(requeued.dead_lettered_at.is_none());
	}

	#[tokio::test]
	async fn test_cancel_and_counts() {
		let pool = create_job_test_pool().await;
		let repo = JobRunRepository::new(pool);
		let now = Utc::now();

		let a = repo.insert_run(&make_new_run("x"), now).await.unwrap();
		let _b = repo.insert_run(&make_new_run("x"), now).await.unwrap();

		assert!(!repo.is_canceled(&a.id).await.unwrap());
		assert!(repo.cancel_run(&a.id, now).await.unwrap());
		assert!(!repo.cancel_run(&a.id, now).await.unwrap());
		assert!(repo.is_canceled(&a.id).await.unwrap());

		let counts = repo.count_by_status().await.unwrap();
		assert_eq!(counts[&JobRunStatus::Queued], 1);
		assert_eq!(counts[&JobRunStatus::Canceled], 1);
		assert_eq!(counts[&JobRunStatus::DeadLetter], 0);

		let canceled = repo
			.list_runs(Some(JobRunStatus::Canceled), 10)
			.await
			.unwrap();
		assert_eq!(canceled.len(), 1);
		assert_eq!(repo.list_runs(None, 10).await.unwrap().len(), 2);
	}
}
