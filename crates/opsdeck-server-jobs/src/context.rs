// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opsdeck_server_db::{JobRun, JobRunStore};

/// What a handler sees about the run it is executing.
pub struct JobContext {
	pub run_id: String,
	pub job_type: String,
	pub attempt: u32,
	pub max_attempts: u32,
	pub cancellation_token: CancellationToken,
	runs: Arc<dyn JobRunStore>,
}

impl JobContext {
	pub fn new(run: &JobRun, runs: Arc<dyn JobRunStore>) -> Self {
		Self {
			run_id: run.id.clone(),
			job_type: run.job_type.clone(),
			attempt: run.attempts,
			max_attempts: run.max_attempts,
			cancellation_token: CancellationToken::new(),
			runs,
		}
	}

	/// Cooperative cancellation check.
	///
	/// True once the runner gave up on this attempt (timeout) or an operator
	/// canceled the row. Store errors read as "not canceled".
	pub async fn is_cancel_requested(&self) -> bool {
		if self.cancellation_token.is_cancelled() {
			return true;
		}

		match self.runs.is_canceled(&self.run_id).await {
			Ok(true) => {
				self.cancellation_token.cancel();
				true
			}
			Ok(false) => false,
			Err(e) => {
				tracing::warn!(job_id = %self.run_id, error = %e, "cancel check failed");
				false
			}
		}
	}
}

#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
