// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timestamp encoding for the job tables.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microsecond precision, so SQL string comparison orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::DbError;

pub fn format_ts(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(value: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{value}': {e}")))
}

pub fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
	value.as_deref().map(parse_ts).transpose()
}

/// Truncate to the stored precision so values compare equal after a round trip.
pub fn truncate_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
	parse_ts(&format_ts(ts)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_format_is_fixed_width() {
		let whole = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
		let fractional = whole + chrono::Duration::milliseconds(500);
		assert_eq!(format_ts(whole), "2024-01-10T09:00:00.000000Z");
		assert_eq!(format_ts(fractional), "2024-01-10T09:00:00.500000Z");
		assert!(format_ts(whole) < format_ts(fractional));
	}

	#[test]
	fn test_parse_round_trip() {
		let ts = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
		assert_eq!(parse_ts(&format_ts(ts)).unwrap(), ts);
	}

	#[test]
	fn test_parse_rejects_garbage() {
		assert!(matches!(parse_ts("yesterday"), Err(DbError::Internal(_))));
	}

	#[test]
	fn test_truncate_drops_nanoseconds() {
		let ts = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap() + chrono::Duration::nanoseconds(1_234_567);
		let truncated = truncate_ts(ts);
		assert_eq!(format_ts(truncated), "2024-01-10T09:00:00.001234Z");
	}
}
