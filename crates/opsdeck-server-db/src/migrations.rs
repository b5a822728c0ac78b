// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const MIGRATIONS: &[(&str, &str)] = &[
	("001_job_runs", include_str!("../migrations/001_job_runs.sql")),
	(
		"002_job_schedules",
		include_str!("../migrations/002_job_schedules.sql"),
	),
];

/// Create the `job_runs` and `job_schedules` tables and their indexes.
///
/// # Note
/// Migrations are idempotent - safe to run multiple times.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for (name, sql) in MIGRATIONS {
		for stmt in sql.split(';').filter(|s| !s.trim().is_empty()) {
			sqlx::query(stmt).execute(pool).await?;
		}
		tracing::debug!(migration = name, "migration applied");
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();

		let tables: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('job_runs', 'job_schedules')",
		)
		.fetch_one(&pool)
		.await
		.unwrap();
		assert_eq!(tables, 2);
	}
}
