// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable background job queue and cadence scheduler.
//!
//! Request handlers enqueue work into the `job_runs` table; short-lived
//! `tick` invocations recover expired leases, turn due schedules into runs,
//! and claim and execute runs with retry, backoff and dead-lettering. All
//! coordination happens through compare-and-swap updates on the store.

pub mod backoff;
pub mod cadence;
pub mod context;
pub mod enqueue;
pub mod error;
pub mod handler;
pub mod health;
pub mod queue;
pub mod recovery;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod tick;

pub use backoff::BackoffPolicy;
pub use cadence::{compute_next_run_at, Cadence, ScheduleCadence};
pub use context::{CancellationToken, JobContext};
pub use enqueue::{EnqueueOutcome, EnqueueRequest, Enqueuer};
pub use error::{JobError, Result};
pub use handler::{HandlerRegistry, JobHandler};
pub use health::{HealthState, QueueHealth};
pub use queue::JobQueue;
pub use recovery::{RecoveryReport, StaleLockRecovery};
pub use runner::{generate_runner_id, RunReport, Runner};
pub use scheduler::{schedule_dedupe_key, CadenceScheduler, ScheduleReport};
pub use settings::QueueSettings;
pub use tick::{TickOptions, TickReport};
