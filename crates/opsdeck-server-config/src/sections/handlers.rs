// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Handler dispatch configuration: where job payloads are delivered.

use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/internal/jobs";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Clone)]
pub struct HandlersConfig {
	pub base_url: String,
	pub request_timeout_secs: u64,
	/// Sent as a bearer token on every dispatch request.
	pub auth_token: Option<String>,
}

impl std::fmt::Debug for HandlersConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandlersConfig")
			.field("base_url", &self.base_url)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

impl Default for HandlersConfig {
	fn default() -> Self {
		HandlersConfigLayer::default().finalize()
	}
}

#[derive(Clone, Default, Deserialize)]
pub struct HandlersConfigLayer {
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub request_timeout_secs: Option<u64>,
	#[serde(default)]
	pub auth_token: Option<String>,
}

impl std::fmt::Debug for HandlersConfigLayer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandlersConfigLayer")
			.field("base_url", &self.base_url)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

impl HandlersConfigLayer {
	pub fn merge(&mut self, other: HandlersConfigLayer) {
		if other.base_url.is_some() {
			self.base_url = other.base_url;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.auth_token.is_some() {
			self.auth_token = other.auth_token;
		}
	}

	pub fn finalize(self) -> HandlersConfig {
		HandlersConfig {
			base_url: self
				.base_url
				.map(|url| url.trim_end_matches('/').to_string())
				.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
			request_timeout_secs: self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
			auth_token: self.auth_token,
		}
	}
}
