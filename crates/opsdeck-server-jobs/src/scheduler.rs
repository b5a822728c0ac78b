// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsdeck_server_db::{format_ts, JobSchedule, JobScheduleStore, ScheduleAdvance, UpsertJobSchedule};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cadence::ScheduleCadence;
use crate::enqueue::{EnqueueRequest, Enqueuer};
use crate::error::{JobError, Result};

pub const SCHEDULE_SOURCE_TYPE: &str = "schedule";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
	pub due_schedules: u32,
	pub jobs_enqueued: u32,
	/// Due schedules parked because their definition cannot be fired.
	pub skipped: u32,
}

/// The dedupe key shared by every enqueue attempt for one occurrence.
pub fn schedule_dedupe_key(key: &str, due_at: DateTime<Utc>) -> String {
	format!("schedule:{key}:{}", format_ts(due_at))
}

#[derive(Clone)]
pub struct CadenceScheduler {
	schedules: Arc<dyn JobScheduleStore>,
	enqueuer: Enqueuer,
}

impl CadenceScheduler {
	pub fn new(schedules: Arc<dyn JobScheduleStore>, enqueuer: Enqueuer) -> Self {
		Self { schedules, enqueuer }
	}

	/// Enqueue one run for every due, enabled schedule and advance it.
	///
	/// Safe to call concurrently: a tick enqueues an occurrence only after
	/// winning the compare-and-swap that advances `next_run_at` past it, and
	/// the per-occurrence dedupe key guards the insert as well. Schedules
	/// that cannot be fired are parked so they stop holding `limit` slots.
	#[instrument(skip(self))]
	pub async fn enqueue_due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<ScheduleReport> {
		let mut report = ScheduleReport::default();
		let due = self.schedules.list_due_schedules(now, limit).await?;
		report.due_schedules = due.len() as u32;

		for schedule in due {
			let Some(due_at) = schedule.next_run_at else {
				continue;
			};

			let next_run_at = match next_run_after_due(&schedule, due_at, now) {
				Ok(next) => next,
				Err(e) => {
					self.park(&schedule.key, due_at, now, &e).await?;
					report.skipped += 1;
					continue;
				}
			};

			let mut request = EnqueueRequest::new(schedule.job_type.clone(), schedule.payload_template.clone())
				.with_priority(schedule.priority)
				.with_max_attempts(schedule.max_attempts)
				.with_run_after(due_at)
				.with_dedupe_key(schedule_dedupe_key(&schedule.key, due_at))
				.with_source(SCHEDULE_SOURCE_TYPE, schedule.key.clone());
			request.timeout_seconds = schedule.timeout_seconds;

			if let Err(e) = self.enqueuer.validate(&request) {
				self.park(&schedule.key, due_at, now, &e).await?;
				report.skipped += 1;
				continue;
			}

			let advance = ScheduleAdvance {
				next_run_at,
				last_enqueued_at: now,
			};
			let advanced = self
				.schedules
				.advance_schedule(&schedule.key, due_at, &advance, now)
				.await?;
			if !advanced {
				debug!(schedule_key = %schedule.key, "occurrence already taken by another tick");
				continue;
			}

			let outcome = self.enqueuer.enqueue(request, now).await?;
			self.schedules.record_last_run(&schedule.key, &outcome.id, now).await?;
			if outcome.created {
				report.jobs_enqueued += 1;
			}

			info!(
				schedule_key = %schedule.key,
				job_id = %outcome.id,
				created = outcome.created,
				next_run_at = %next_run_at,
				"schedule fired"
			);
		}

		Ok(report)
	}

	async fn park(&self, key: &str, due_at: DateTime<Utc>, now: DateTime<Utc>, reason: &JobError) -> Result<()> {
		let parked = self.schedules.park_schedule(key, due_at, now).await?;
		warn!(
			schedule_key = %key,
			error = %reason,
			parked,
			"schedule cannot be fired; cleared next_run_at until it is upserted again"
		);
		Ok(())
	}

	/// Validate and store a schedule definition. Without an explicit
	/// `next_run_at` the first occurrence after `now` is used.
	#[instrument(skip(self, definition), fields(schedule_key = %definition.key))]
	pub async fn upsert_schedule(&self, mut definition: UpsertJobSchedule, now: DateTime<Utc>) -> Result<JobSchedule> {
		if definition.key.trim().is_empty() {
			return Err(JobError::InvalidRequest("schedule key must not be empty".to_string()));
		}
		if definition.job_type.trim().is_empty() {
			return Err(JobError::InvalidRequest("job_type must not be empty".to_string()));
		}
		if definition.max_attempts < 1 {
			return Err(JobError::InvalidRequest("max_attempts must be at least 1".to_string()));
		}

		let cadence = ScheduleCadence::from_definition(&definition)?;
		if definition.next_run_at.is_none() {
			definition.next_run_at = Some(cadence.next_after(now)?);
		}

		Ok(self.schedules.upsert_schedule(&definition, now).await?)
	}

	pub async fn get_schedule(&self, key: &str) -> Result<JobSchedule> {
		self
			.schedules
			.get_schedule(key)
			.await?
			.ok_or_else(|| JobError::NotFound(format!("schedule {key}")))
	}

	pub async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
		Ok(self.schedules.list_schedules().await?)
	}

	#[instrument(skip(self))]
	pub async fn set_schedule_enabled(&self, key: &str, enabled: bool, now: DateTime<Utc>) -> Result<()> {
		if !self.schedules.set_enabled(key, enabled, now).await? {
			return Err(JobError::NotFound(format!("schedule {key}")));
		}
		info!(schedule_key = %key, enabled, "schedule toggled");
		Ok(())
	}
}

/// The occurrence after `due_at`, skipping forward past `now` when windows
/// were missed so a long outage fires once rather than once per window.
fn next_run_after_due(schedule: &JobSchedule, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
	let cadence = ScheduleCadence::from_schedule(schedule)?;
	let next = cadence.next_after(due_at)?;
	if next > now {
		Ok(next)
	} else {
		cadence.next_after(now)
	}
}
