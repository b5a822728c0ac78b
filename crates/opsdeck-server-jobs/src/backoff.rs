// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

pub const DEFAULT_BASE_DELAY_SECS: u64 = 30;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3600;
const RETRY_FACTOR: f64 = 2.0;
/// Jitter adds up to this fraction of the exponential delay.
const MAX_JITTER: f64 = 0.5;

/// Exponential retry delay with bounded jitter:
/// `min(max, base * 2^(attempts - 1) * (1 + j))`, `j` in `[0, 0.5)`.
///
/// Because the jitter never exceeds the doubling, delays never shrink as
/// `attempts` grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
	pub base: Duration,
	pub max: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
			max: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
		}
	}
}

impl BackoffPolicy {
	pub fn new(base: Duration, max: Duration) -> Self {
		Self { base, max }
	}

	pub fn delay(&self, attempts: u32) -> Duration {
		self.delay_with_jitter(attempts, fastrand::f64() * MAX_JITTER)
	}

	/// `jitter` is clamped to `[0, 0.5)`.
	pub fn delay_with_jitter(&self, attempts: u32, jitter: f64) -> Duration {
		let exponent = attempts.saturating_sub(1).min(62) as i32;
		let jitter = jitter.clamp(0.0, MAX_JITTER - f64::EPSILON);
		let secs = self.base.as_secs_f64() * RETRY_FACTOR.powi(exponent) * (1.0 + jitter);
		let capped = secs.min(self.max.as_secs_f64());
		Duration::from_secs_f64(capped.max(0.0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_backoff_without_jitter() {
		let policy = BackoffPolicy::default();
		assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_secs(30));
		assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_secs(60));
		assert_eq!(policy.delay_with_jitter(3, 0.0), Duration::from_secs(120));
		assert_eq!(policy.delay_with_jitter(20, 0.0), Duration::from_secs(3600));
	}

	#[test]
	fn test_zeroth_attempt_uses_base() {
		let policy = BackoffPolicy::default();
		assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_secs(30));
	}

	proptest! {
		#[test]
		fn delays_never_decrease(
			attempts in 1u32..40,
			j1 in 0.0f64..0.5,
			j2 in 0.0f64..0.5,
		) {
			let policy = BackoffPolicy::default();
			let earlier = policy.delay_with_jitter(attempts, j1);
			let later = policy.delay_with_jitter(attempts + 1, j2);
			prop_assert!(later >= earlier);
		}

		#[test]
		fn delays_are_bounded(attempts in 0u32..1000) {
			let policy = BackoffPolicy::default();
			let delay = policy.delay(attempts);
			prop_assert!(delay >= policy.base.min(policy.max));
			prop_assert!(delay <= policy.max);
		}
	}
}
