// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Tunables shared by the runner, recovery and scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
	pub claim_limit: u32,
	pub run_concurrency: usize,
	pub stale_after_minutes: u32,
	pub default_max_attempts: u32,
	/// Applied when a run has no `timeout_seconds` of its own.
	pub default_timeout: Duration,
	pub backoff: BackoffPolicy,
	pub schedule_batch_limit: u32,
}

impl Default for QueueSettings {
	fn default() -> Self {
		Self {
			claim_limit: 25,
			run_concurrency: 4,
			stale_after_minutes: 15,
			default_max_attempts: 3,
			default_timeout: Duration::from_secs(300),
			backoff: BackoffPolicy::default(),
			schedule_batch_limit: 50,
		}
	}
}
