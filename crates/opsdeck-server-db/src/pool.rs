// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a SqlitePool with WAL mode and common settings.
///
/// Concurrent tick/run invocations share one database file, so writers wait on
/// the busy timeout instead of failing with `SQLITE_BUSY`.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./opsdeck.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(8)
		.connect_with(options)
		.await?;

	tracing::debug!("database pool created");
	Ok(pool)
}
