// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The fixed set of job types this deployment knows how to execute.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use opsdeck_server_config::HandlersConfig;
use opsdeck_server_jobs::HandlerRegistry;

use crate::dispatch::{DispatchError, HttpDispatchHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
	LeadScoring,
	ProposalFollowup,
	DeliverySnapshot,
	NotificationDigest,
}

impl JobKind {
	pub const ALL: [JobKind; 4] = [
		JobKind::LeadScoring,
		JobKind::ProposalFollowup,
		JobKind::DeliverySnapshot,
		JobKind::NotificationDigest,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			JobKind::LeadScoring => "lead_scoring",
			JobKind::ProposalFollowup => "proposal_followup",
			JobKind::DeliverySnapshot => "delivery_snapshot",
			JobKind::NotificationDigest => "notification_digest",
		}
	}
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job kind: {0}")]
pub struct UnknownJobKind(pub String);

impl FromStr for JobKind {
	type Err = UnknownJobKind;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		JobKind::ALL
			.into_iter()
			.find(|kind| kind.as_str() == s)
			.ok_or_else(|| UnknownJobKind(s.to_string()))
	}
}

/// One HTTP dispatch handler per [`JobKind`], sharing a single client.
pub fn build_registry(config: &HandlersConfig) -> Result<HandlerRegistry, DispatchError> {
	let client = HttpDispatchHandler::build_client(config)?;
	let mut registry = HandlerRegistry::new();
	for kind in JobKind::ALL {
		registry.register(Arc::new(HttpDispatchHandler::new(
			kind,
			client.clone(),
			config,
		)));
	}
	Ok(registry)
}
