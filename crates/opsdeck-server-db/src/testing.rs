// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::migrations::run_migrations;
use crate::pool::create_pool;

/// A single-connection in-memory pool; every connection to `:memory:` would
/// otherwise see its own empty database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await
		.unwrap()
}

pub async fn create_job_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}

/// A WAL-mode database file inside `dir`, for tests that need several
/// connections writing concurrently.
pub async fn create_file_job_test_pool(dir: &std::path::Path) -> SqlitePool {
	let url = format!("sqlite:{}", dir.join("jobs.db").display());
	let pool = create_pool(&url).await.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}
