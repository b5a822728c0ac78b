// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job store for the opsdeck job queue.
//!
//! Two tables coordinate every worker: `job_runs` holds queued and finished
//! work, `job_schedules` holds recurring definitions. All state transitions
//! are single-statement conditional updates, so any number of short-lived
//! processes may share one database file.

pub mod error;
pub mod job_run;
pub mod job_schedule;
pub mod migrations;
pub mod pool;
pub mod testing;
pub mod time;

pub use error::{DbError, Result};
pub use job_run::{
	JobRun, JobRunRepository, JobRunStatus, JobRunStore, NewJobRun, RunResolution, StaleResolution,
};
pub use job_schedule::{
	CadenceType, JobSchedule, JobScheduleRepository, JobScheduleStore, ScheduleAdvance,
	UpsertJobSchedule,
};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use time::{format_ts, parse_ts, truncate_ts};
