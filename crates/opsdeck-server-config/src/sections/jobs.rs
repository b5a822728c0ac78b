// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job queue configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub claim_limit: Option<u32>,
	pub run_concurrency: Option<usize>,
	pub stale_after_minutes: Option<u32>,
	pub default_max_attempts: Option<u32>,
	pub default_timeout_secs: Option<u64>,
	pub retry_base_delay_secs: Option<u64>,
	pub retry_max_delay_secs: Option<u64>,
	pub schedule_batch_limit: Option<u32>,
	pub watch_interval_secs: Option<u64>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.claim_limit.is_some() {
			self.claim_limit = other.claim_limit;
		}
		if other.run_concurrency.is_some() {
			self.run_concurrency = other.run_concurrency;
		}
		if other.stale_after_minutes.is_some() {
			self.stale_after_minutes = other.stale_after_minutes;
		}
		if other.default_max_attempts.is_some() {
			self.default_max_attempts = other.default_max_attempts;
		}
		if other.default_timeout_secs.is_some() {
			self.default_timeout_secs = other.default_timeout_secs;
		}
		if other.retry_base_delay_secs.is_some() {
			self.retry_base_delay_secs = other.retry_base_delay_secs;
		}
		if other.retry_max_delay_secs.is_some() {
			self.retry_max_delay_secs = other.retry_max_delay_secs;
		}
		if other.schedule_batch_limit.is_some() {
			self.schedule_batch_limit = other.schedule_batch_limit;
		}
		if other.watch_interval_secs.is_some() {
			self.watch_interval_secs = other.watch_interval_secs;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		let defaults = JobsConfig::default();
		JobsConfig {
			claim_limit: self.claim_limit.unwrap_or(defaults.claim_limit),
			run_concurrency: self.run_concurrency.unwrap_or(defaults.run_concurrency),
			stale_after_minutes: self.stale_after_minutes.unwrap_or(defaults.stale_after_minutes),
			default_max_attempts: self.default_max_attempts.unwrap_or(defaults.default_max_attempts),
			default_timeout_secs: self.default_timeout_secs.unwrap_or(defaults.default_timeout_secs),
			retry_base_delay_secs: self.retry_base_delay_secs.unwrap_or(defaults.retry_base_delay_secs),
			retry_max_delay_secs: self.retry_max_delay_secs.unwrap_or(defaults.retry_max_delay_secs),
			schedule_batch_limit: self.schedule_batch_limit.unwrap_or(defaults.schedule_batch_limit),
			watch_interval_secs: self.watch_interval_secs.unwrap_or(defaults.watch_interval_secs),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub claim_limit: u32,
	pub run_concurrency: usize,
	pub stale_after_minutes: u32,
	pub default_max_attempts: u32,
	pub default_timeout_secs: u64,
	pub retry_base_delay_secs: u64,
	pub retry_max_delay_secs: u64,
	pub schedule_batch_limit: u32,
	pub watch_interval_secs: u64,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			claim_limit: 25,
			run_concurrency: 4,
			stale_after_minutes: 15,
			default_max_attempts: 3,
			default_timeout_secs: 300,
			retry_base_delay_secs: 30,
			retry_max_delay_secs: 3600, // 1 hour
			schedule_batch_limit: 50,
			watch_interval_secs: 60,
		}
	}
}

impl JobsConfig {
	/// A lease must outlive the longest execution budget, or recovery would
	/// requeue runs that are still executing.
	pub fn validate(&self) -> Result<(), String> {
		if self.claim_limit == 0 {
			return Err("jobs.claim_limit must be at least 1".to_string());
		}
		if self.run_concurrency == 0 {
			return Err("jobs.run_concurrency must be at least 1".to_string());
		}
		if self.default_max_attempts == 0 {
			return Err("jobs.default_max_attempts must be at least 1".to_string());
		}
		if self.retry_base_delay_secs > self.retry_max_delay_secs {
			return Err("jobs.retry_base_delay_secs must not exceed jobs.retry_max_delay_secs".to_string());
		}
		if u64::from(self.stale_after_minutes) * 60 <= self.default_timeout_secs {
			return Err(format!(
				"jobs.stale_after_minutes ({}m) must exceed jobs.default_timeout_secs ({}s)",
				self.stale_after_minutes, self.default_timeout_secs
			));
		}
		Ok(())
	}
}
