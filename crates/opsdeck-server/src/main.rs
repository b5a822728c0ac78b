// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! opsdeck job runner binary.
//!
//! Every subcommand is a short-lived invocation against the shared job store,
//! suitable for an external cron or an internal trigger. `watch` loops `tick`
//! for deployments without one.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use opsdeck_server_config::{LogFormat, ServerConfig};
use opsdeck_server_db::{JobRunStatus, UpsertJobSchedule};
use opsdeck_server_jobs::{generate_runner_id, EnqueueRequest, HealthState, JobQueue, TickOptions};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// opsdeck-server - durable job queue runner and cadence scheduler.
#[derive(Parser, Debug)]
#[command(name = "opsdeck-server", about = "opsdeck job queue runner", version)]
struct Args {
	/// Config file to use instead of /etc/opsdeck/server.toml
	#[arg(long, global = true, env = "OPSDECK_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Recover stale leases, enqueue due schedules, then run claimable jobs
	Tick(TickArgs),

	/// Claim and execute up to `--limit` runs
	RunOnce {
		#[arg(long)]
		limit: Option<u32>,
		#[arg(long)]
		runner_id: Option<String>,
	},

	/// Requeue or dead-letter runs whose lease expired
	Recover {
		#[arg(long)]
		stale_after_minutes: Option<u32>,
	},

	/// Insert a run into the queue
	Enqueue(EnqueueArgs),

	/// Return a dead-lettered, failed or canceled run to the queue
	Requeue { id: String },

	/// Cancel a queued or running run
	Cancel { id: String },

	/// Inspect runs
	#[command(subcommand)]
	Runs(RunsCommand),

	/// Manage recurring schedules
	#[command(subcommand)]
	Schedules(SchedulesCommand),

	/// Report queue health; exits non-zero when unhealthy
	Health,

	/// Tick on an interval until interrupted
	Watch {
		#[arg(long)]
		interval_secs: Option<u64>,
		#[command(flatten)]
		tick: TickArgs,
	},

	/// Show version and build information
	Version,
}

#[derive(ClapArgs, Debug, Clone, Copy)]
struct TickArgs {
	/// Skip claiming and executing runs
	#[arg(long)]
	no_run: bool,
	/// Skip enqueuing due schedules
	#[arg(long)]
	no_schedules: bool,
	/// Skip stale-lease recovery
	#[arg(long)]
	no_recover: bool,
	/// Maximum runs to claim
	#[arg(long)]
	limit: Option<u32>,
}

impl From<TickArgs> for TickOptions {
	fn from(args: TickArgs) -> Self {
		TickOptions {
			run: !args.no_run,
			enqueue_schedules: !args.no_schedules,
			recover_stale: !args.no_recover,
			limit: args.limit,
		}
	}
}

#[derive(ClapArgs, Debug)]
struct EnqueueArgs {
	#[arg(long)]
	job_type: String,
	/// JSON payload
	#[arg(long, default_value = "{}")]
	payload: String,
	#[arg(long)]
	priority: Option<i32>,
	#[arg(long)]
	max_attempts: Option<u32>,
	#[arg(long)]
	timeout_secs: Option<u32>,
	#[arg(long)]
	dedupe_key: Option<String>,
	/// Delay before the run becomes claimable
	#[arg(long)]
	delay_secs: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
	List {
		#[arg(long)]
		status: Option<JobRunStatus>,
		#[arg(long, default_value_t = 50)]
		limit: u32,
	},
	Show {
		id: String,
	},
}

#[derive(Subcommand, Debug)]
enum SchedulesCommand {
	List,
	/// Create or update schedules from a JSON file (one object or an array)
	Upsert {
		#[arg(long)]
		file: PathBuf,
	},
	Enable {
		key: String,
	},
	Disable {
		key: String,
	},
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScheduleFile {
	One(UpsertJobSchedule),
	Many(Vec<UpsertJobSchedule>),
}

impl ScheduleFile {
	fn into_vec(self) -> Vec<UpsertJobSchedule> {
		match self {
			ScheduleFile::One(definition) => vec![definition],
			ScheduleFile::Many(definitions) => definitions,
		}
	}
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());

	// Reports go to stdout; logs stay on stderr.
	match config.logging.format {
		LogFormat::Json => tracing_subscriber::registry()
			.with(filter)
			.with(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(std::io::stderr),
			)
			.init(),
		LogFormat::Pretty => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
			.init(),
	}
}

async fn open_queue(config: &ServerConfig) -> anyhow::Result<JobQueue> {
	let pool = opsdeck_server_db::create_pool(&config.database.url)
		.await
		.with_context(|| format!("opening job store at {}", config.database.url))?;
	opsdeck_server_db::run_migrations(&pool).await?;

	let registry = opsdeck_server::build_registry(&config.handlers)?;
	Ok(JobQueue::new(
		pool,
		registry,
		opsdeck_server::queue_settings(&config.jobs),
	))
}

async fn watch(queue: &JobQueue, interval: Duration, options: TickOptions) -> anyhow::Result<()> {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);

	tracing::info!(interval_secs = interval.as_secs(), "watching job queue");

	loop {
		tokio::select! {
			_ = &mut shutdown => {
				tracing::info!("shutdown signal received, stopping watch");
				return Ok(());
			}
			_ = ticker.tick() => {
				match queue.tick(options).await {
					Ok(report) => tracing::info!(report = %serde_json::to_string(&report)?, "tick completed"),
					Err(e) => tracing::error!(error = %e, "tick failed"),
				}
			}
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => opsdeck_server_config::load_config_with_file(path)?,
		None => opsdeck_server_config::load_config()?,
	};

	init_tracing(&config);

	tracing::info!(database = %config.database.url, "starting opsdeck-server");

	let queue = open_queue(&config).await?;

	match args.command {
		Command::Version => {}
		Command::Tick(tick) => {
			queue.validate_schedules().await?;
			print_json(&queue.tick(tick.into()).await?)?;
		}
		Command::RunOnce { limit, runner_id } => {
			let runner_id = runner_id.unwrap_or_else(generate_runner_id);
			let limit = limit.unwrap_or(queue.settings().claim_limit);
			print_json(&queue.run_once(limit, &runner_id).await?)?;
		}
		Command::Recover {
			stale_after_minutes,
		} => {
			let minutes = stale_after_minutes.unwrap_or(queue.settings().stale_after_minutes);
			print_json(&queue.recover_stale(minutes).await?)?;
		}
		Command::Enqueue(enqueue) => {
			let payload: serde_json::Value =
				serde_json::from_str(&enqueue.payload).context("--payload must be valid JSON")?;
			let request = EnqueueRequest {
				job_type: enqueue.job_type,
				payload,
				priority: enqueue.priority,
				max_attempts: enqueue.max_attempts,
				timeout_seconds: enqueue.timeout_secs,
				run_after: enqueue
					.delay_secs
					.map(|secs| Utc::now() + chrono::Duration::seconds(i64::from(secs))),
				dedupe_key: enqueue.dedupe_key,
				source_type: Some("cli".to_string()),
				..Default::default()
			};
			print_json(&queue.enqueue(request).await?)?;
		}
		Command::Requeue { id } => print_json(&queue.requeue(&id).await?)?,
		Command::Cancel { id } => print_json(&queue.cancel(&id).await?)?,
		Command::Runs(RunsCommand::List { status, limit }) => {
			print_json(&queue.list_runs(status, limit).await?)?;
		}
		Command::Runs(RunsCommand::Show { id }) => print_json(&queue.get_run(&id).await?)?,
		Command::Schedules(SchedulesCommand::List) => print_json(&queue.list_schedules().await?)?,
		Command::Schedules(SchedulesCommand::Upsert { file }) => {
			let raw = std::fs::read_to_string(&file)
				.with_context(|| format!("reading {}", file.display()))?;
			let parsed: ScheduleFile = serde_json::from_str(&raw)
				.with_context(|| format!("parsing schedule definitions in {}", file.display()))?;

			let mut saved = Vec::new();
			for definition in parsed.into_vec() {
				if !queue.registry().contains(&definition.job_type) {
					tracing::warn!(
						schedule_key = %definition.key,
						job_type = %definition.job_type,
						"schedule names a job type without a handler"
					);
				}
				saved.push(queue.upsert_schedule(definition).await?);
			}
			print_json(&saved)?;
		}
		Command::Schedules(SchedulesCommand::Enable { key }) => {
			queue.set_schedule_enabled(&key, true).await?;
			print_json(&queue.get_schedule(&key).await?)?;
		}
		Command::Schedules(SchedulesCommand::Disable { key }) => {
			queue.set_schedule_enabled(&key, false).await?;
			print_json(&queue.get_schedule(&key).await?)?;
		}
		Command::Health => {
			let health = queue.health().await?;
			print_json(&health)?;
			if health.status == HealthState::Unhealthy {
				anyhow::bail!("job queue is unhealthy");
			}
		}
		Command::Watch {
			interval_secs,
			tick,
		} => {
			queue.validate_schedules().await?;
			let interval = Duration::from_secs(
				interval_secs
					.unwrap_or(config.jobs.watch_interval_secs)
					.max(1),
			);
			watch(&queue, interval, tick.into()).await?;
		}
	}

	Ok(())
}
