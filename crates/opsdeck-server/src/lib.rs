// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring between configuration, handlers and the job queue.

pub mod dispatch;
pub mod kinds;

use std::time::Duration;

use opsdeck_server_config::JobsConfig;
use opsdeck_server_jobs::{BackoffPolicy, QueueSettings};

pub use dispatch::{classify_status, DispatchError, HttpDispatchHandler};
pub use kinds::{build_registry, JobKind, UnknownJobKind};

pub fn queue_settings(config: &JobsConfig) -> QueueSettings {
	QueueSettings {
		claim_limit: config.claim_limit,
		run_concurrency: config.run_concurrency,
		stale_after_minutes: config.stale_after_minutes,
		default_max_attempts: config.default_max_attempts,
		default_timeout: Duration::from_secs(config.default_timeout_secs),
		backoff: BackoffPolicy::new(
			Duration::from_secs(config.retry_base_delay_secs),
			Duration::from_secs(config.retry_max_delay_secs),
		),
		schedule_batch_limit: config.schedule_batch_limit,
	}
}
