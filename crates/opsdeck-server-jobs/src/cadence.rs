// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Next-occurrence calculation for recurring schedules.
//!
//! Every function here is pure: the same cadence, timezone and starting
//! instant always produce the same result, which is strictly after the start.
//! Calendar cadences are evaluated on the schedule's local wall clock; a local
//! time skipped by a DST transition resolves to the first valid minute after
//! it, and a repeated local time resolves to its earlier instant.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use opsdeck_server_db::{CadenceType, JobSchedule, UpsertJobSchedule};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};

/// Upper bound on local days scanned for a calendar match. Monthly cadences
/// match at least once every 31 days.
const MAX_SCAN_DAYS: u32 = 64;
/// Longest DST gap handled, in minutes.
const MAX_GAP_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
	Interval { minutes: u32 },
	Daily { hour: u32, minute: u32 },
	/// `day_of_week`: 0 = Sunday through 6 = Saturday.
	Weekly { day_of_week: u32, hour: u32, minute: u32 },
	/// `day_of_month` beyond a month's length fires on its last day.
	Monthly { day_of_month: u32, hour: u32, minute: u32 },
	Cron { expression: String },
}

impl Cadence {
	/// Assemble a cadence from the flat columns of a schedule row.
	pub fn from_parts(
		cadence_type: CadenceType,
		interval_minutes: Option<u32>,
		day_of_week: Option<u32>,
		day_of_month: Option<u32>,
		hour: Option<u32>,
		minute: Option<u32>,
		cron_expression: Option<&str>,
	) -> Result<Self> {
		let required = |value: Option<u32>, field: &str| {
			value.ok_or_else(|| JobError::InvalidCadence(format!("{cadence_type} cadence requires {field}")))
		};

		let cadence = match cadence_type {
			CadenceType::Interval => Cadence::Interval {
				minutes: required(interval_minutes, "interval_minutes")?,
			},
			CadenceType::Daily => Cadence::Daily {
				hour: required(hour, "hour")?,
				minute: minute.unwrap_or(0),
			},
			CadenceType::Weekly => Cadence::Weekly {
				day_of_week: required(day_of_week, "day_of_week")?,
				hour: required(hour, "hour")?,
				minute: minute.unwrap_or(0),
			},
			CadenceType::Monthly => Cadence::Monthly {
				day_of_month: required(day_of_month, "day_of_month")?,
				hour: required(hour, "hour")?,
				minute: minute.unwrap_or(0),
			},
			CadenceType::Cron => Cadence::Cron {
				expression: cron_expression
					.filter(|e| !e.trim().is_empty())
					.ok_or_else(|| JobError::InvalidCadence("cron cadence requires cron_expression".to_string()))?
					.to_string(),
			},
		};

		cadence.validate()?;
		Ok(cadence)
	}

	pub fn validate(&self) -> Result<()> {
		match self {
			Cadence::Interval { minutes } => {
				if *minutes < 1 {
					return Err(JobError::InvalidCadence("interval_minutes must be at least 1".to_string()));
				}
			}
			Cadence::Daily { hour, minute } => validate_time(*hour, *minute)?,
			Cadence::Weekly {
				day_of_week,
				hour,
				minute,
			} => {
				if *day_of_week > 6 {
					return Err(JobError::InvalidCadence(format!(
						"day_of_week must be 0-6 (Sunday = 0), got {day_of_week}"
					)));
				}
				validate_time(*hour, *minute)?;
			}
			Cadence::Monthly {
				day_of_month,
				hour,
				minute,
			} => {
				if !(1..=31).contains(day_of_month) {
					return Err(JobError::InvalidCadence(format!(
						"day_of_month must be 1-31, got {day_of_month}"
					)));
				}
				validate_time(*hour, *minute)?;
			}
			Cadence::Cron { expression } => {
				parse_cron(expression)?;
			}
		}
		Ok(())
	}
}

fn validate_time(hour: u32, minute: u32) -> Result<()> {
	if hour > 23 {
		return Err(JobError::InvalidCadence(format!("hour must be 0-23, got {hour}")));
	}
	if minute > 59 {
		return Err(JobError::InvalidCadence(format!("minute must be 0-59, got {minute}")));
	}
	Ok(())
}

/// A cadence bound to the timezone its wall-clock fields are read in.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCadence {
	pub cadence: Cadence,
	pub timezone: Tz,
}

impl ScheduleCadence {
	pub fn from_schedule(schedule: &JobSchedule) -> Result<Self> {
		Ok(Self {
			cadence: Cadence::from_parts(
				schedule.cadence_type,
				schedule.interval_minutes,
				schedule.day_of_week,
				schedule.day_of_month,
				schedule.hour,
				schedule.minute,
				schedule.cron_expression.as_deref(),
			)?,
			timezone: parse_timezone(&schedule.timezone)?,
		})
	}

	pub fn from_definition(definition: &UpsertJobSchedule) -> Result<Self> {
		Ok(Self {
			cadence: Cadence::from_parts(
				definition.cadence_type,
				definition.interval_minutes,
				definition.day_of_week,
				definition.day_of_month,
				definition.hour,
				definition.minute,
				definition.cron_expression.as_deref(),
			)?,
			timezone: parse_timezone(&definition.timezone)?,
		})
	}

	pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
		compute_next_run_at(&self.cadence, self.timezone, from)
	}
}

pub fn parse_timezone(timezone: &str) -> Result<Tz> {
	timezone
		.parse::<Tz>()
		.map_err(|_| JobError::InvalidCadence(format!("unknown timezone: {timezone}")))
}

/// The first occurrence of `cadence` strictly after `from`.
pub fn compute_next_run_at(cadence: &Cadence, timezone: Tz, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
	cadence.validate()?;

	match cadence {
		Cadence::Interval { minutes } => Ok(from + Duration::minutes(i64::from(*minutes))),
		Cadence::Daily { hour, minute } => next_local_match(from, timezone, *hour, *minute, |_| true),
		Cadence::Weekly {
			day_of_week,
			hour,
			minute,
		} => next_local_match(from, timezone, *hour, *minute, |date| {
			date.weekday().num_days_from_sunday() == *day_of_week
		}),
		Cadence::Monthly {
			day_of_month,
			hour,
			minute,
		} => next_local_match(from, timezone, *hour, *minute, |date| {
			date.day() == (*day_of_month).min(days_in_month(date.year(), date.month()))
		}),
		Cadence::Cron { expression } => {
			let schedule = parse_cron(expression)?;
			schedule
				.after(&from.with_timezone(&timezone))
				.next()
				.map(|next| next.with_timezone(&Utc))
				.ok_or_else(|| JobError::InvalidCadence(format!("cron expression never fires again: {expression}")))
		}
	}
}

/// Scan local dates starting at `from`'s local date for the first day
/// accepted by `matches` whose `hour:minute` resolves after `from`.
fn next_local_match(
	from: DateTime<Utc>,
	timezone: Tz,
	hour: u32,
	minute: u32,
	matches: impl Fn(NaiveDate) -> bool,
) -> Result<DateTime<Utc>> {
	let mut date = from.with_timezone(&timezone).date_naive();

	for _ in 0..MAX_SCAN_DAYS {
		if matches(date) {
			if let Some(local) = date.and_hms_opt(hour, minute, 0) {
				if let Some(candidate) = resolve_local(timezone, local) {
					if candidate > from {
						return Ok(candidate);
					}
				}
			}
		}
		date = date
			.succ_opt()
			.ok_or_else(|| JobError::InvalidCadence("date out of range".to_string()))?;
	}

	Err(JobError::InvalidCadence(format!(
		"no occurrence of {hour:02}:{minute:02} within {MAX_SCAN_DAYS} days"
	)))
}

fn resolve_local(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
	let mut candidate = local;
	for _ in 0..=MAX_GAP_MINUTES {
		match timezone.from_local_datetime(&candidate) {
			LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
			LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
			LocalResult::None => candidate += Duration::minutes(1),
		}
	}
	None
}

fn days_in_month(year: i32, month: u32) -> u32 {
	let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
	NaiveDate::from_ymd_opt(next_year, next_month, 1)
		.and_then(|first| first.pred_opt())
		.map(|last| last.day())
		.unwrap_or(28)
}

/// Standard 5-field expressions gain a leading seconds field and a trailing
/// year field; 6- and 7-field expressions pass through.
fn to_cron_crate_format(expression: &str) -> String {
	if expression.split_whitespace().count() == 5 {
		format!("0 {} *", expression.trim())
	} else {
		expression.trim().to_string()
	}
}

fn parse_cron(expression: &str) -> Result<Schedule> {
	Schedule::from_str(&to_cron_crate_format(expression))
		.map_err(|e| JobError::InvalidCadence(format!("invalid cron expression '{expression}': {e}")))
}
