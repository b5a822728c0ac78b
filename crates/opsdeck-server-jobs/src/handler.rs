// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opsdeck_server_db::JobSchedule;

use crate::context::JobContext;
use crate::error::{JobError, Result};

/// Business logic for one job type.
///
/// Returning `JobError::Cancelled` marks the run canceled; any other error
/// consumes an attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
	fn job_type(&self) -> &str;
	async fn run(&self, ctx: &JobContext, payload: &serde_json::Value) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
	handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Later registrations for the same job type replace earlier ones.
	pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
		self.handlers.insert(handler.job_type().to_string(), handler);
	}

	pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
		self.handlers.get(job_type).cloned()
	}

	pub fn contains(&self, job_type: &str) -> bool {
		self.handlers.contains_key(job_type)
	}

	pub fn job_types(&self) -> Vec<String> {
		let mut types: Vec<String> = self.handlers.keys().cloned().collect();
		types.sort();
		types
	}

	/// Reject enabled schedules that point at a job type nobody handles.
	pub fn validate_schedules(&self, schedules: &[JobSchedule]) -> Result<()> {
		let mut missing: Vec<String> = schedules
			.iter()
			.filter(|s| s.is_enabled && !self.contains(&s.job_type))
			.map(|s| format!("{} (schedule {})", s.job_type, s.key))
			.collect();

		if missing.is_empty() {
			return Ok(());
		}

		missing.sort();
		Err(JobError::UnregisteredJobType(missing.join(", ")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use opsdeck_server_db::CadenceType;

	struct NoopHandler(&'static str);

	#[async_trait]
	impl JobHandler for NoopHandler {
		fn job_type(&self) -> &str {
			self.0
		}

		async fn run(&self, _ctx: &JobContext, _payload: &serde_json::Value) -> Result<()> {
			Ok(())
		}
	}

	fn schedule(key: &str, job_type: &str, is_enabled: bool) -> JobSchedule {
		JobSchedule {
			key: key.to_string(),
			job_type: job_type.to_string(),
			payload_template: serde_json::json!({}),
			priority: 0,
			max_attempts: 3,
			timeout_seconds: None,
			cadence_type: CadenceType::Interval,
			interval_minutes: Some(30),
			day_of_week: None,
			day_of_month: None,
			hour: None,
			minute: None,
			cron_expression: None,
			timezone: "UTC".to_string(),
			is_enabled,
			next_run_at: None,
			last_enqueued_at: None,
			last_run_job_id: None,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	#[test]
	fn test_register_and_lookup() {
		let mut registry = HandlerRegistry::new();
		registry.register(Arc::new(NoopHandler("lead_scoring")));
		registry.register(Arc::new(NoopHandler("delivery_snapshot")));

		assert!(registry.contains("lead_scoring"));
		assert!(registry.get("unknown").is_none());
		assert_eq!(
			registry.job_types(),
			vec!["delivery_snapshot".to_string(), "lead_scoring".to_string()]
		);
	}

	#[test]
	fn test_validate_schedules_ignores_disabled() {
		let mut registry = HandlerRegistry::new();
		registry.register(Arc::new(NoopHandler("lead_scoring")));

		let schedules = vec![
			schedule("a", "lead_scoring", true),
			schedule("b", "retired_job", false),
		];
		assert!(registry.validate_schedules(&schedules).is_ok());

		let schedules = vec![schedule("c", "retired_job", true)];
		let err = registry.validate_schedules(&schedules).unwrap_err();
		assert!(matches!(err, JobError::UnregisteredJobType(ref m) if m.contains("schedule c")));
	}
}
