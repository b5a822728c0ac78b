// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use opsdeck_server_db::{
	DbError, JobRun, JobRunRepository, JobRunStatus, JobRunStore, JobSchedule, JobScheduleRepository,
	JobScheduleStore, UpsertJobSchedule,
};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::enqueue::{EnqueueOutcome, EnqueueRequest, Enqueuer};
use crate::error::{JobError, Result};
use crate::handler::HandlerRegistry;
use crate::health::{determine_health_state, QueueHealth};
use crate::recovery::{RecoveryReport, StaleLockRecovery};
use crate::runner::{RunReport, Runner};
use crate::scheduler::{CadenceScheduler, ScheduleReport};
use crate::settings::QueueSettings;

const HEALTH_STALE_SCAN_LIMIT: u32 = 1000;

/// Entry point tying the store, handlers and settings together.
#[derive(Clone)]
pub struct JobQueue {
	runs: Arc<dyn JobRunStore>,
	schedules: Arc<dyn JobScheduleStore>,
	registry: Arc<HandlerRegistry>,
	settings: QueueSettings,
	enqueuer: Enqueuer,
	runner: Runner,
	recovery: StaleLockRecovery,
	scheduler: CadenceScheduler,
}

impl JobQueue {
	pub fn new(pool: SqlitePool, registry: HandlerRegistry, settings: QueueSettings) -> Self {
		Self::with_stores(
			Arc::new(JobRunRepository::new(pool.clone())),
			Arc::new(JobScheduleRepository::new(pool)),
			Arc::new(registry),
			settings,
		)
	}

	pub fn with_stores(
		runs: Arc<dyn JobRunStore>,
		schedules: Arc<dyn JobScheduleStore>,
		registry: Arc<HandlerRegistry>,
		settings: QueueSettings,
	) -> Self {
		let enqueuer = Enqueuer::new(Arc::clone(&runs), settings.default_max_attempts);
		let runner = Runner::new(Arc::clone(&runs), Arc::clone(&registry), settings.clone());
		let recovery = StaleLockRecovery::new(Arc::clone(&runs));
		let scheduler = CadenceScheduler::new(Arc::clone(&schedules), enqueuer.clone());
		Self {
			runs,
			schedules,
			registry,
			settings,
			enqueuer,
			runner,
			recovery,
			scheduler,
		}
	}

	pub fn settings(&self) -> &QueueSettings {
		&self.settings
	}

	pub fn registry(&self) -> &HandlerRegistry {
		&self.registry
	}

	pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome> {
		self.enqueuer.enqueue(request, Utc::now()).await
	}

	pub async fn run_once(&self, limit: u32, runner_id: &str) -> Result<RunReport> {
		self.runner.run_once(limit, runner_id).await
	}

	pub async fn recover_stale(&self, stale_after_minutes: u32) -> Result<RecoveryReport> {
		self.recovery.recover_stale(stale_after_minutes).await
	}

	pub async fn enqueue_due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<ScheduleReport> {
		self.scheduler.enqueue_due_schedules(now, limit).await
	}

	pub async fn get_run(&self, id: &str) -> Result<JobRun> {
		self
			.runs
			.get_run(id)
			.await?
			.ok_or_else(|| JobError::NotFound(id.to_string()))
	}

	pub async fn list_runs(&self, status: Option<JobRunStatus>, limit: u32) -> Result<Vec<JobRun>> {
		Ok(self.runs.list_runs(status, limit).await?)
	}

	/// Put a dead-lettered, failed or canceled run back in the queue.
	#[instrument(skip(self))]
	pub async fn requeue(&self, id: &str) -> Result<JobRun> {
		match self.runs.requeue_run(id, Utc::now()).await {
			Ok(run) => {
				info!(job_id = %run.id, attempts = run.attempts, "run requeued");
				Ok(run)
			}
			Err(DbError::NotFound(id)) => Err(JobError::NotFound(id)),
			Err(e) => Err(e.into()),
		}
	}

	/// Cancel a queued or running run. Running handlers observe the change
	/// through `JobContext::is_cancel_requested`.
	#[instrument(skip(self))]
	pub async fn cancel(&self, id: &str) -> Result<JobRun> {
		let canceled = self.runs.cancel_run(id, Utc::now()).await?;
		let run = self.get_run(id).await?;
		if !canceled {
			return Err(JobError::InvalidRequest(format!(
				"run {id} is {} and cannot be canceled",
				run.status
			)));
		}
		info!(job_id = %run.id, "run canceled");
		Ok(run)
	}

	#[instrument(skip(self))]
	pub async fn health(&self) -> Result<QueueHealth> {
		let now = Utc::now();
		let stale_after = Duration::minutes(i64::from(self.settings.stale_after_minutes));
		let counts = self.runs.count_by_status().await?;
		let oldest_queued_at = self.runs.oldest_claimable_run_after(now).await?;
		let stale_running = self
			.runs
			.list_stale_runs(now - stale_after, HEALTH_STALE_SCAN_LIMIT)
			.await?
			.len() as u32;
		let dead_letter = counts.get(&JobRunStatus::DeadLetter).copied().unwrap_or(0);

		Ok(QueueHealth {
			status: determine_health_state(dead_letter, stale_running, oldest_queued_at, stale_after, now),
			counts,
			oldest_queued_at,
			stale_running,
			checked_at: now,
		})
	}

	/// Fail fast when an enabled schedule names a job type without a handler.
	pub async fn validate_schedules(&self) -> Result<()> {
		let schedules = self.schedules.list_schedules().await?;
		self.registry.validate_schedules(&schedules)
	}

	pub async fn upsert_schedule(&self, definition: UpsertJobSchedule) -> Result<JobSchedule> {
		self.scheduler.upsert_schedule(definition, Utc::now()).await
	}

	pub async fn get_schedule(&self, key: &str) -> Result<JobSchedule> {
		self.scheduler.get_schedule(key).await
	}

	pub async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
		self.scheduler.list_schedules().await
	}

	pub async fn set_schedule_enabled(&self, key: &str, enabled: bool) -> Result<()> {
		self.scheduler.set_schedule_enabled(key, enabled, Utc::now()).await
	}
}
