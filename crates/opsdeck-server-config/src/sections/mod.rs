// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod handlers;
mod jobs;
mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use handlers::{HandlersConfig, HandlersConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
