// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::queue::JobQueue;
use crate::recovery::RecoveryReport;
use crate::runner::{generate_runner_id, RunReport};
use crate::scheduler::ScheduleReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOptions {
	pub run: bool,
	pub enqueue_schedules: bool,
	pub recover_stale: bool,
	/// Claim limit for the run phase; the configured limit when `None`.
	pub limit: Option<u32>,
}

impl Default for TickOptions {
	fn default() -> Self {
		Self {
			run: true,
			enqueue_schedules: true,
			recover_stale: true,
			limit: None,
		}
	}
}

/// `None` marks a phase that was switched off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
	pub recovered: Option<RecoveryReport>,
	pub scheduled: Option<ScheduleReport>,
	pub run: Option<RunReport>,
}

impl JobQueue {
	/// One maintenance cycle: recover stale leases, enqueue due schedules,
	/// then drain claimable runs. Repeated ticks are safe.
	#[instrument(skip(self))]
	pub async fn tick(&self, options: TickOptions) -> Result<TickReport> {
		let mut report = TickReport::default();

		if options.recover_stale {
			report.recovered = Some(self.recover_stale(self.settings().stale_after_minutes).await?);
		}

		if options.enqueue_schedules {
			report.scheduled = Some(
				self
					.enqueue_due_schedules(Utc::now(), self.settings().schedule_batch_limit)
					.await?,
			);
		}

		if options.run {
			let limit = options.limit.unwrap_or(self.settings().claim_limit);
			let runner_id = generate_runner_id();
			report.run = Some(self.run_once(limit, &runner_id).await?);
		}

		info!(
			recovered = report.recovered.map(|r| r.count),
			enqueued = report.scheduled.map(|s| s.jobs_enqueued),
			claimed = report.run.map(|r| r.claimed),
			"tick finished"
		);
		Ok(report)
	}
}
