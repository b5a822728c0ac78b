// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivers job payloads to the application's internal job endpoints.
//!
//! Each run is POSTed as `{run_id, job_type, attempt, payload}` to
//! `{base_url}/{job_type}`. The response status decides the outcome:
//! 2xx succeeds, 409 reports the work as cancelled, anything else fails the
//! attempt with an `http_<status>` error code so the retry budget applies.

use std::time::Duration;

use async_trait::async_trait;
use opsdeck_server_config::HandlersConfig;
use opsdeck_server_jobs::{JobContext, JobError, JobHandler};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::kinds::JobKind;

const USER_AGENT: &str = concat!("opsdeck-server/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
	#[error("failed to build HTTP client: {0}")]
	Client(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
	run_id: &'a str,
	job_type: &'a str,
	attempt: u32,
	payload: &'a serde_json::Value,
}

pub struct HttpDispatchHandler {
	kind: JobKind,
	client: reqwest::Client,
	endpoint: String,
	auth_token: Option<String>,
}

impl HttpDispatchHandler {
	pub fn new(kind: JobKind, client: reqwest::Client, config: &HandlersConfig) -> Self {
		Self {
			kind,
			client,
			endpoint: format!("{}/{}", config.base_url, kind.as_str()),
			auth_token: config.auth_token.clone(),
		}
	}

	pub fn build_client(config: &HandlersConfig) -> Result<reqwest::Client, DispatchError> {
		Ok(
			reqwest::Client::builder()
				.user_agent(USER_AGENT)
				.timeout(Duration::from_secs(config.request_timeout_secs))
				.build()?,
		)
	}
}

/// Map an endpoint's response status onto a handler outcome.
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), JobError> {
	if status.is_success() {
		return Ok(());
	}
	if status == StatusCode::CONFLICT {
		return Err(JobError::Cancelled);
	}

	let mut message = format!("endpoint returned {status}");
	let body = body.trim();
	if !body.is_empty() {
		let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
		message.push_str(": ");
		message.push_str(&excerpt);
	}
	Err(JobError::failed_with_code(
		message,
		format!("http_{}", status.as_u16()),
	))
}

#[async_trait]
impl JobHandler for HttpDispatchHandler {
	fn job_type(&self) -> &str {
		self.kind.as_str()
	}

	#[instrument(skip(self, ctx, payload), fields(job_id = %ctx.run_id, job_type = %self.kind, attempt = ctx.attempt))]
	async fn run(&self, ctx: &JobContext, payload: &serde_json::Value) -> Result<(), JobError> {
		if ctx.is_cancel_requested().await {
			return Err(JobError::Cancelled);
		}

		let body = DispatchRequest {
			run_id: &ctx.run_id,
			job_type: self.kind.as_str(),
			attempt: ctx.attempt,
			payload,
		};

		let mut request = self.client.post(&self.endpoint).json(&body);
		if let Some(token) = &self.auth_token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await.map_err(|e| {
			warn!(endpoint = %self.endpoint, error = %e, "dispatch request failed");
			JobError::failed_with_code(e.to_string(), "dispatch_error")
		})?;

		let status = response.status();
		let text = if status.is_success() {
			String::new()
		} else {
			response.text().await.unwrap_or_default()
		};

		debug!(status = status.as_u16(), "dispatch response received");
		classify_status(status, &text)
	}
}
