// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use opsdeck_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job failed: {message}")]
	Failed {
		message: String,
		code: Option<String>,
	},

	#[error("Job cancelled")]
	Cancelled,

	#[error("Job timed out after {0}s")]
	Timeout(u64),

	#[error("Job panicked: {0}")]
	Panicked(String),

	#[error("No handler registered for job type: {0}")]
	UnregisteredJobType(String),

	#[error("Invalid cadence: {0}")]
	InvalidCadence(String),

	#[error("Invalid request: {0}")]
	InvalidRequest(String),

	#[error("Repository error: {0}")]
	Repository(#[from] DbError),

	#[error("Job not found: {0}")]
	NotFound(String),
}

impl JobError {
	pub fn failed(message: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			code: None,
		}
	}

	pub fn failed_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			code: Some(code.into()),
		}
	}

	/// The value recorded in `job_runs.error_code` when this error ends an attempt.
	pub fn error_code(&self) -> &str {
		match self {
			JobError::Failed {
				code: Some(code), ..
			} => code,
			JobError::Timeout(_) => "timeout",
			JobError::Panicked(_) => "panic",
			JobError::UnregisteredJobType(_) => "unregistered_job_type",
			JobError::Cancelled => "canceled",
			_ => "handler_error",
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
