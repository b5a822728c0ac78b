// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `job_schedules` table: recurring job definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::time::{format_ts, parse_opt_ts, parse_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceType {
	Interval,
	Daily,
	Weekly,
	Monthly,
	Cron,
}

impl CadenceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			CadenceType::Interval => "interval",
			CadenceType::Daily => "daily",
			CadenceType::Weekly => "weekly",
			CadenceType::Monthly => "monthly",
			CadenceType::Cron => "cron",
		}
	}
}

impl std::fmt::Display for CadenceType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for CadenceType {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"interval" => Ok(CadenceType::Interval),
			"daily" => Ok(CadenceType::Daily),
			"weekly" => Ok(CadenceType::Weekly),
			"monthly" => Ok(CadenceType::Monthly),
			"cron" => Ok(CadenceType::Cron),
			_ => Err(format!("unknown cadence type: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
	pub key: String,
	pub job_type: String,
	pub payload_template: serde_json::Value,
	pub priority: i32,
	pub max_attempts: u32,
	pub timeout_seconds: Option<u32>,
	pub cadence_type: CadenceType,
	pub interval_minutes: Option<u32>,
	pub day_of_week: Option<u32>,
	pub day_of_month: Option<u32>,
	pub hour: Option<u32>,
	pub minute: Option<u32>,
	pub cron_expression: Option<String>,
	pub timezone: String,
	pub is_enabled: bool,
	pub next_run_at: Option<DateTime<Utc>>,
	pub last_enqueued_at: Option<DateTime<Utc>>,
	pub last_run_job_id: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

fn default_payload_template() -> serde_json::Value {
	serde_json::json!({})
}

fn default_max_attempts() -> u32 {
	3
}

fn default_timezone() -> String {
	"UTC".to_string()
}

fn default_enabled() -> bool {
	true
}

/// A schedule definition as written by an operator; bookkeeping columns are
/// owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertJobSchedule {
	pub key: String,
	pub job_type: String,
	#[serde(default = "default_payload_template")]
	pub payload_template: serde_json::Value,
	#[serde(default)]
	pub priority: i32,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default)]
	pub timeout_seconds: Option<u32>,
	pub cadence_type: CadenceType,
	#[serde(default)]
	pub interval_minutes: Option<u32>,
	#[serde(default)]
	pub day_of_week: Option<u32>,
	#[serde(default)]
	pub day_of_month: Option<u32>,
	#[serde(default)]
	pub hour: Option<u32>,
	#[serde(default)]
	pub minute: Option<u32>,
	#[serde(default)]
	pub cron_expression: Option<String>,
	#[serde(default = "default_timezone")]
	pub timezone: String,
	#[serde(default = "default_enabled")]
	pub is_enabled: bool,
	#[serde(default)]
	pub next_run_at: Option<DateTime<Utc>>,
}

/// Moves a due schedule past the occurrence being fired. Winning this update
/// is what entitles a tick to enqueue the occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleAdvance {
	pub next_run_at: DateTime<Utc>,
	pub last_enqueued_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = r#"
	SELECT key, job_type, payload_template, priority, max_attempts, timeout_seconds,
	       cadence_type, interval_minutes, day_of_week, day_of_month, hour, minute,
	       cron_expression, timezone, is_enabled, next_run_at, last_enqueued_at,
	       last_run_job_id, created_at, updated_at
	FROM job_schedules
"#;

#[derive(sqlx::FromRow)]
struct JobScheduleRow {
	key: String,
	job_type: String,
	payload_template: String,
	priority: i64,
	max_attempts: i64,
	timeout_seconds: Option<i64>,
	cadence_type: String,
	interval_minutes: Option<i64>,
	day_of_week: Option<i64>,
	day_of_month: Option<i64>,
	hour: Option<i64>,
	minute: Option<i64>,
	cron_expression: Option<String>,
	timezone: String,
	is_enabled: i64,
	next_run_at: Option<String>,
	last_enqueued_at: Option<String>,
	last_run_job_id: Option<String>,
	created_at: String,
	updated_at: String,
}

fn opt_u32(value: Option<i64>) -> Option<u32> {
	value.map(|v| v.max(0) as u32)
}

impl TryFrom<JobScheduleRow> for JobSchedule {
	type Error = DbError;

	fn try_from(row: JobScheduleRow) -> Result<Self> {
		Ok(JobSchedule {
			key: row.key,
			job_type: row.job_type,
			payload_template: serde_json::from_str(&row.payload_template)?,
			priority: row.priority as i32,
			max_attempts: row.max_attempts.max(0) as u32,
			timeout_seconds: opt_u32(row.timeout_seconds),
			cadence_type: row.cadence_type.parse().map_err(DbError::Internal)?,
			interval_minutes: opt_u32(row.interval_minutes),
			day_of_week: opt_u32(row.day_of_week),
			day_of_month: opt_u32(row.day_of_month),
			hour: opt_u32(row.hour),
			minute: opt_u32(row.minute),
			cron_expression: row.cron_expression,
			timezone: row.timezone,
			is_enabled: row.is_enabled != 0,
			next_run_at: parse_opt_ts(row.next_run_at)?,
			last_enqueued_at: parse_opt_ts(row.last_enqueued_at)?,
			last_run_job_id: row.last_run_job_id,
			created_at: parse_ts(&row.created_at)?,
			updated_at: parse_ts(&row.updated_at)?,
		})
	}
}

#[derive(Clone)]
pub struct JobScheduleRepository {
	pool: SqlitePool,
}

impl JobScheduleRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert or replace a schedule definition, keeping its bookkeeping columns.
	#[tracing::instrument(skip(self, schedule), fields(key = %schedule.key))]
	pub async fn upsert_schedule(
		&self,
		schedule: &UpsertJobSchedule,
		now: DateTime<Utc>,
	) -> Result<JobSchedule> {
		let now_str = format_ts(now);
		sqlx::query(
			r#"
			INSERT INTO job_schedules (
				key, job_type, payload_template, priority, max_attempts, timeout_seconds,
				cadence_type, interval_minutes, day_of_week, day_of_month, hour, minute,
				cron_expression, timezone, is_enabled, next_run_at, created_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET
				job_type = excluded.job_type,
				payload_template = excluded.payload_template,
				priority = excluded.priority,
				max_attempts = excluded.max_attempts,
				timeout_seconds = excluded.timeout_seconds,
				cadence_type = excluded.cadence_type,
				interval_minutes = excluded.interval_minutes,
				day_of_week = excluded.day_of_week,
				day_of_month = excluded.day_of_month,
				hour = excluded.hour,
				minute = excluded.minute,
				cron_expression = excluded.cron_expression,
				timezone = excluded.timezone,
				is_enabled = excluded.is_enabled,
				next_run_at = excluded.next_run_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&schedule.key)
		.bind(&schedule.job_type)
		.bind(serde_json::to_string(&schedule.payload_template)?)
		.bind(schedule.priority as i64)
		.bind(schedule.max_attempts as i64)
		.bind(schedule.timeout_seconds.map(i64::from))
		.bind(schedule.cadence_type.as_str())
		.bind(schedule.interval_minutes.map(i64::from))
		.bind(schedule.day_of_week.map(i64::from))
		.bind(schedule.day_of_month.map(i64::from))
		.bind(schedule.hour.map(i64::from))
		.bind(schedule.minute.map(i64::from))
		.bind(&schedule.cron_expression)
		.bind(&schedule.timezone)
		.bind(schedule.is_enabled as i64)
		.bind(schedule.next_run_at.map(format_ts))
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await?;

		self
			.get_schedule(&schedule.key)
			.await?
			.ok_or_else(|| DbError::Internal(format!("upserted schedule {} not readable", schedule.key)))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_schedule(&self, key: &str) -> Result<Option<JobSchedule>> {
		let row = sqlx::query_as::<_, JobScheduleRow>(&format!("{SELECT_COLUMNS} WHERE key = ?"))
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
		let rows = sqlx::query_as::<_, JobScheduleRow>(&format!("{SELECT_COLUMNS} ORDER BY key ASC"))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Returns `false` for unknown keys.
	#[tracing::instrument(skip(self))]
	pub async fn set_enabled(&self, key: &str, enabled: bool, now: DateTime<Utc>) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE job_schedules SET is_enabled = ?, updated_at = ? WHERE key = ?",
		)
		.bind(enabled as i64)
		.bind(format_ts(now))
		.bind(key)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Enabled schedules whose `next_run_at` has passed, oldest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<JobSchedule>> {
		let rows = sqlx::query_as::<_, JobScheduleRow>(&format!(
			r#"{SELECT_COLUMNS}
			WHERE is_enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
			ORDER BY next_run_at ASC, key ASC
			LIMIT ?"#
		))
		.bind(format_ts(now))
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Compare-and-swap `next_run_at` forward from the value the caller observed.
	///
	/// Returns `false` when another tick advanced the schedule first or it was
	/// disabled in between.
	#[tracing::instrument(skip(self, advance))]
	pub async fn advance_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		advance: &ScheduleAdvance,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_schedules
			SET next_run_at = ?, last_enqueued_at = ?, updated_at = ?
			WHERE key = ? AND is_enabled = 1 AND next_run_at = ?
			"#,
		)
		.bind(format_ts(advance.next_run_at))
		.bind(format_ts(advance.last_enqueued_at))
		.bind(format_ts(now))
		.bind(key)
		.bind(format_ts(expected_next_run_at))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Point the schedule at the run its latest occurrence produced.
	#[tracing::instrument(skip(self))]
	pub async fn record_last_run(&self, key: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE job_schedules SET last_run_job_id = ?, updated_at = ? WHERE key = ?",
		)
		.bind(job_id)
		.bind(format_ts(now))
		.bind(key)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Clear `next_run_at` on a schedule that cannot be fired, so it stops
	/// occupying the due listing. Re-upserting a corrected definition
	/// schedules it again.
	#[tracing::instrument(skip(self))]
	pub async fn park_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE job_schedules SET next_run_at = NULL, updated_at = ? WHERE key = ? AND next_run_at = ?",
		)
		.bind(format_ts(now))
		.bind(key)
		.bind(format_ts(expected_next_run_at))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}
}

#[async_trait]
pub trait JobScheduleStore: Send + Sync {
	async fn upsert_schedule(&self, schedule: &UpsertJobSchedule, now: DateTime<Utc>)
		-> Result<JobSchedule>;
	async fn get_schedule(&self, key: &str) -> Result<Option<JobSchedule>>;
	async fn list_schedules(&self) -> Result<Vec<JobSchedule>>;
	async fn set_enabled(&self, key: &str, enabled: bool, now: DateTime<Utc>) -> Result<bool>;
	async fn list_due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<JobSchedule>>;
	async fn advance_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		advance: &ScheduleAdvance,
		now: DateTime<Utc>,
	) -> Result<bool>;
	async fn record_last_run(&self, key: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool>;
	async fn park_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool>;
}

#[async_trait]
impl JobScheduleStore for JobScheduleRepository {
	async fn upsert_schedule(
		&self,
		schedule: &UpsertJobSchedule,
		now: DateTime<Utc>,
	) -> Result<JobSchedule> {
		self.upsert_schedule(schedule, now).await
	}

	async fn get_schedule(&self, key: &str) -> Result<Option<JobSchedule>> {
		self.get_schedule(key).await
	}

	async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
		self.list_schedules().await
	}

	async fn set_enabled(&self, key: &str, enabled: bool, now: DateTime<Utc>) -> Result<bool> {
		self.set_enabled(key, enabled, now).await
	}

	async fn list_due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<JobSchedule>> {
		self.list_due_schedules(now, limit).await
	}

	async fn advance_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		advance: &ScheduleAdvance,
		now: DateTime<Utc>,
	) -> Result<bool> {
		self
			.advance_schedule(key, expected_next_run_at, advance, now)
			.await
	}

	async fn record_last_run(&self, key: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
		self.record_last_run(key, job_id, now).await
	}

	async fn park_schedule(
		&self,
		key: &str,
		expected_next_run_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<bool> {
		self.park_schedule(key, expected_next_run_at, now).await
	}
}
