// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{Duration, Utc};
use opsdeck_server_db::{JobRunStore, StaleResolution};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

const RECOVERY_BATCH: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
	pub count: u32,
	pub requeued: u32,
	pub dead_lettered: u32,
}

/// Returns running rows whose lease has expired to the queue, or dead-letters
/// them when their attempt budget is spent.
#[derive(Clone)]
pub struct StaleLockRecovery {
	runs: Arc<dyn JobRunStore>,
}

impl StaleLockRecovery {
	pub fn new(runs: Arc<dyn JobRunStore>) -> Self {
		Self { runs }
	}

	#[instrument(skip(self))]
	pub async fn recover_stale(&self, stale_after_minutes: u32) -> Result<RecoveryReport> {
		let mut report = RecoveryReport::default();
		let now = Utc::now();
		let cutoff = now - Duration::minutes(i64::from(stale_after_minutes));

		loop {
			let stale = self.runs.list_stale_runs(cutoff, RECOVERY_BATCH).await?;
			if stale.is_empty() {
				break;
			}

			let mut progressed = false;
			for run in &stale {
				let resolution = if run.has_attempts_left() {
					StaleResolution::Requeue
				} else {
					StaleResolution::DeadLetter
				};

				if !self
					.runs
					.resolve_stale_run(&run.id, cutoff, resolution, now)
					.await?
				{
					debug!(job_id = %run.id, "stale run resolved elsewhere");
					continue;
				}

				progressed = true;
				report.count += 1;
				match resolution {
					StaleResolution::Requeue => {
						report.requeued += 1;
						info!(job_id = %run.id, lock_owner = ?run.lock_owner, attempts = run.attempts, "requeued stale run");
					}
					StaleResolution::DeadLetter => {
						report.dead_lettered += 1;
						warn!(job_id = %run.id, lock_owner = ?run.lock_owner, attempts = run.attempts, "dead-lettered stale run");
					}
				}
			}

			if !progressed || (stale.len() as u32) < RECOVERY_BATCH {
				break;
			}
		}

		Ok(report)
	}
}
