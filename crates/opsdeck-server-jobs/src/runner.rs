// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Claim & execute: `queued → running → {succeeded | queued | dead_letter | canceled}`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use opsdeck_server_db::{JobRun, JobRunStore, RunResolution};
use serde::Serialize;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::handler::HandlerRegistry;
use crate::settings::QueueSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
	pub claimed: u32,
	pub succeeded: u32,
	pub retried: u32,
	/// Every handler failure in the pass: `retried + dead_lettered`.
	pub failed: u32,
	pub dead_lettered: u32,
	pub canceled: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
	Succeeded,
	Retried,
	DeadLettered,
	Canceled,
	LeaseLost,
}

impl RunReport {
	fn record(&mut self, outcome: Outcome) {
		match outcome {
			Outcome::Succeeded => self.succeeded += 1,
			Outcome::Retried => {
				self.retried += 1;
				self.failed += 1;
			}
			Outcome::DeadLettered => {
				self.dead_lettered += 1;
				self.failed += 1;
			}
			Outcome::Canceled => self.canceled += 1,
			Outcome::LeaseLost => {}
		}
	}
}

/// A lease owner id unique to this process and call.
pub fn generate_runner_id() -> String {
	format!("runner-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

#[derive(Clone)]
pub struct Runner {
	runs: Arc<dyn JobRunStore>,
	registry: Arc<HandlerRegistry>,
	settings: QueueSettings,
}

impl Runner {
	pub fn new(runs: Arc<dyn JobRunStore>, registry: Arc<HandlerRegistry>, settings: QueueSettings) -> Self {
		Self {
			runs,
			registry,
			settings,
		}
	}

	/// Claim up to `limit` due runs and execute them.
	///
	/// Handler failures are recorded on their rows and never abort the pass;
	/// store errors do.
	#[instrument(skip(self))]
	pub async fn run_once(&self, limit: u32, runner_id: &str) -> Result<RunReport> {
		let mut report = RunReport::default();
		if limit == 0 {
			return Ok(report);
		}

		let claimed = self.claim(limit, runner_id).await?;
		report.claimed = claimed.len() as u32;
		if claimed.is_empty() {
			debug!("no claimable runs");
			return Ok(report);
		}

		let concurrency = self.settings.run_concurrency.max(1);
		let results: Vec<Result<Outcome>> = stream::iter(claimed)
			.map(|run| self.execute(run, runner_id))
			.buffer_unordered(concurrency)
			.collect()
			.await;

		let mut first_error = None;
		for result in results {
			match result {
				Ok(outcome) => report.record(outcome),
				Err(e) => {
					warn!(error = %e, "failed to record run outcome");
					first_error.get_or_insert(e);
				}
			}
		}
		if let Some(e) = first_error {
			return Err(e);
		}

		info!(
			claimed = report.claimed,
			succeeded = report.succeeded,
			retried = report.retried,
			dead_lettered = report.dead_lettered,
			canceled = report.canceled,
			"run pass finished"
		);
		Ok(report)
	}

	/// Claim rows one compare-and-swap at a time. A store error releases every
	/// row this call already claimed before it propagates.
	async fn claim(&self, limit: u32, runner_id: &str) -> Result<Vec<JobRun>> {
		let mut claimed_ids = Vec::new();
		let result = self.claim_into(&mut claimed_ids, limit, runner_id).await;
		let result = match result {
			Ok(()) => self.load_claimed(&claimed_ids).await,
			Err(e) => Err(e),
		};

		match result {
			Ok(runs) => Ok(runs),
			Err(e) => {
				self.release(&claimed_ids, runner_id).await;
				Err(e)
			}
		}
	}

	async fn claim_into(&self, claimed_ids: &mut Vec<String>, limit: u32, runner_id: &str) -> Result<()> {
		while (claimed_ids.len() as u32) < limit {
			let now = Utc::now();
			let remaining = limit - claimed_ids.len() as u32;
			let candidates = self.runs.list_claimable_ids(now, remaining).await?;
			if candidates.is_empty() {
				break;
			}

			for id in candidates {
				if self.runs.try_claim(&id, runner_id, now).await? {
					debug!(job_id = %id, "claimed run");
					claimed_ids.push(id);
				} else {
					debug!(job_id = %id, "run claimed by another runner");
				}
			}
		}
		Ok(())
	}

	async fn load_claimed(&self, claimed_ids: &[String]) -> Result<Vec<JobRun>> {
		let mut runs = Vec::with_capacity(claimed_ids.len());
		for id in claimed_ids {
			let run = self
				.runs
				.get_run(id)
				.await?
				.ok_or_else(|| JobError::NotFound(id.clone()))?;
			runs.push(run);
		}
		Ok(runs)
	}

	async fn release(&self, claimed_ids: &[String], runner_id: &str) {
		let now = Utc::now();
		for id in claimed_ids {
			if let Err(e) = self.runs.release_claim(id, runner_id, now).await {
				warn!(job_id = %id, error = %e, "failed to release claimed run");
			}
		}
	}

	async fn execute(&self, run: JobRun, runner_id: &str) -> Result<Outcome> {
		let span = tracing::info_span!(
			"job",
			job_id = %run.id,
			job_type = %run.job_type,
			attempt = run.attempts
		);
		async {
			let result = self.dispatch(&run).await;
			self.resolve(&run, runner_id, result).await
		}
		.instrument(span)
		.await
	}

	async fn dispatch(&self, run: &JobRun) -> Result<()> {
		let Some(handler) = self.registry.get(&run.job_type) else {
			return Err(JobError::UnregisteredJobType(run.job_type.clone()));
		};

		let timeout = run
			.timeout_seconds
			.map(|secs| Duration::from_secs(u64::from(secs)))
			.unwrap_or(self.settings.default_timeout);
		let ctx = JobContext::new(run, Arc::clone(&self.runs));

		let guarded = AssertUnwindSafe(handler.run(&ctx, &run.payload)).catch_unwind();
		match tokio::time::timeout(timeout, guarded).await {
			Ok(Ok(result)) => result,
			Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
			Err(_) => {
				ctx.cancellation_token.cancel();
				Err(JobError::Timeout(timeout.as_secs()))
			}
		}
	}

	async fn resolve(&self, run: &JobRun, runner_id: &str, result: Result<()>) -> Result<Outcome> {
		let now = Utc::now();
		let (resolution, outcome) = match result {
			Ok(()) => (RunResolution::Succeeded, Outcome::Succeeded),
			Err(JobError::Cancelled) => (RunResolution::Canceled, Outcome::Canceled),
			Err(e) if run.has_attempts_left() => {
				let delay = self.settings.backoff.delay(run.attempts);
				let run_after = now
					+ chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
				warn!(
					error = %e,
					error_code = e.error_code(),
					retry_in_secs = delay.as_secs(),
					"job failed, retrying"
				);
				(
					RunResolution::Retry {
						run_after,
						error_message: e.to_string(),
						error_code: e.error_code().to_string(),
					},
					Outcome::Retried,
				)
			}
			Err(e) => {
				warn!(error = %e, error_code = e.error_code(), "job failed, dead-lettering");
				(
					RunResolution::DeadLetter {
						error_message: e.to_string(),
						error_code: e.error_code().to_string(),
					},
					Outcome::DeadLettered,
				)
			}
		};

		if self.runs.resolve_run(&run.id, runner_id, &resolution, now).await? {
			if outcome == Outcome::Succeeded {
				info!("job succeeded");
			}
			return Ok(outcome);
		}

		if self.runs.is_canceled(&run.id).await? {
			info!("run was canceled while executing");
			Ok(Outcome::Canceled)
		} else {
			warn!(?resolution, "lease lost before outcome was recorded");
			Ok(Outcome::LeaseLost)
		}
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"handler panicked".to_string()
	}
}
