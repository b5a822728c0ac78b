// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use opsdeck_server_db::JobRunStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
	pub status: HealthState,
	pub counts: BTreeMap<JobRunStatus, i64>,
	/// `run_after` of the longest-waiting claimable run.
	pub oldest_queued_at: Option<DateTime<Utc>>,
	/// Running rows whose lease is past the stale threshold.
	pub stale_running: u32,
	pub checked_at: DateTime<Utc>,
}

/// Unhealthy when claimable work has waited past the stale threshold (no
/// runner is draining the queue); degraded when dead letters or expired
/// leases are waiting for an operator or the next recovery pass.
pub fn determine_health_state(
	dead_letter: i64,
	stale_running: u32,
	oldest_queued_at: Option<DateTime<Utc>>,
	stale_after: Duration,
	now: DateTime<Utc>,
) -> HealthState {
	if oldest_queued_at.is_some_and(|oldest| now - oldest > stale_after) {
		HealthState::Unhealthy
	} else if dead_letter > 0 || stale_running > 0 {
		HealthState::Degraded
	} else {
		HealthState::Healthy
	}
}
