// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opsdeck_server_db::testing::create_job_test_pool;
use opsdeck_server_db::{format_ts, CadenceType, JobRunStatus, UpsertJobSchedule};
use opsdeck_server_jobs::{
	EnqueueRequest, HandlerRegistry, JobContext, JobError, JobHandler, JobQueue, QueueSettings,
	TickOptions,
};
use sqlx::SqlitePool;

struct ToggleHandler {
	failing: AtomicBool,
	calls: AtomicU32,
}

impl ToggleHandler {
	fn new(failing: bool) -> Arc<Self> {
		Arc::new(Self {
			failing: AtomicBool::new(failing),
			calls: AtomicU32::new(0),
		})
	}
}

#[async_trait]
impl JobHandler for ToggleHandler {
	fn job_type(&self) -> &str {
		"lead_scoring"
	}

	async fn run(&self, _ctx: &JobContext, _payload: &serde_json::Value) -> opsdeck_server_jobs::Result<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if self.failing.load(Ordering::SeqCst) {
			Err(JobError::failed_with_code("scoring service unavailable", "upstream_down"))
		} else {
			Ok(())
		}
	}
}

struct CooperativeHandler;

#[async_trait]
impl JobHandler for CooperativeHandler {
	fn job_type(&self) -> &str {
		"notification_digest"
	}

	async fn run(&self, ctx: &JobContext, _payload: &serde_json::Value) -> opsdeck_server_jobs::Result<()> {
		loop {
			if ctx.is_cancel_requested().await {
				return Err(JobError::Cancelled);
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	}
}

async fn setup(handler: Arc<dyn JobHandler>) -> (JobQueue, SqlitePool) {
	let pool = create_job_test_pool().await;
	let mut registry = HandlerRegistry::new();
	registry.register(handler);
	let queue = JobQueue::new(pool.clone(), registry, QueueSettings::default());
	(queue, pool)
}

async fn make_due(pool: &SqlitePool, id: &str) {
	sqlx::query("UPDATE job_runs SET run_after = ? WHERE id = ?")
		.bind(format_ts(Utc::now() - chrono::Duration::seconds(1)))
		.bind(id)
		.execute(pool)
		.await
		.unwrap();
}

#[tokio::test]
async fn retries_until_max_attempts_then_dead_letters() {
	let handler = ToggleHandler::new(true);
	let (queue, pool) = setup(handler.clone()).await;

	let outcome = queue
		.enqueue(EnqueueRequest::new("lead_scoring", serde_json::json!({"lead_id": 1})).with_max_attempts(3))
		.await
		.unwrap();

	for attempt in 1..=3u32 {
		let report = queue.run_once(10, "runner-a").await.unwrap();
		assert_eq!(report.claimed, 1, "attempt {attempt}");
		assert_eq!(report.failed, 1);

		let run = queue.get_run(&outcome.id).await.unwrap();
		assert_eq!(run.attempts, attempt);
		assert_eq!(run.error_code.as_deref(), Some("upstream_down"));
		if attempt < 3 {
			assert_eq!(report.retried, 1);
			assert_eq!(run.status, JobRunStatus::Queued);
			assert!(run.run_after > Utc::now());
			assert_eq!(queue.run_once(10, "runner-a").await.unwrap().claimed, 0);
			make_due(&pool, &outcome.id).await;
		} else {
			assert_eq!(report.dead_lettered, 1);
			assert_eq!(run.status, JobRunStatus::DeadLetter);
			assert!(run.dead_lettered_at.is_some());
		}
	}

	assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn dead_letter_requeue_then_succeeds() {
	let handler = ToggleHandler::new(true);
	let (queue, _pool) = setup(handler.clone()).await;

	let outcome = queue
		.enqueue(EnqueueRequest::new("lead_scoring", serde_json::json!({})).with_max_attempts(1))
		.await
		.unwrap();
	let report = queue.run_once(10, "runner-a").await.unwrap();
	assert_eq!(report.dead_lettered, 1);

	let requeued = queue.requeue(&outcome.id).await.unwrap();
	assert_eq!(requeued.status, JobRunStatus::Queued);
	assert_eq!(requeued.attempts, 1);
	assert!(requeued.error_message.is_none());

	handler.failing.store(false, Ordering::SeqCst);
	let report = queue.run_once(10, "runner-a").await.unwrap();
	assert_eq!(report.succeeded, 1);

	let done = queue.get_run(&outcome.id).await.unwrap();
	assert_eq!(done.status, JobRunStatus::Succeeded);
	assert_eq!(done.attempts, 2);

	assert!(queue.requeue(&outcome.id).await.is_err());
	assert!(matches!(queue.requeue("missing").await, Err(JobError::NotFound(_))));
}

#[tokio::test]
async fn requeue_conflicts_with_active_dedupe_holder() {
	let handler = ToggleHandler::new(true);
	let (queue, _pool) = setup(handler).await;
	let request = EnqueueRequest::new("lead_scoring", serde_json::json!({}))
		.with_max_attempts(1)
		.with_dedupe_key("lead:9");

	let first = queue.enqueue(request.clone()).await.unwrap();
	queue.run_once(10, "runner-a").await.unwrap();
	let second = queue.enqueue(request).await.unwrap();
	assert!(second.created);

	assert!(queue.requeue(&first.id).await.is_err());
	let still_dead = queue.get_run(&first.id).await.unwrap();
	assert_eq!(still_dead.status, JobRunStatus::DeadLetter);
}

#[tokio::test]
async fn stale_lock_is_recovered_by_tick() {
	let handler = ToggleHandler::new(false);
	let (queue, pool) = setup(handler.clone()).await;

	let outcome = queue
		.enqueue(EnqueueRequest::new("lead_scoring", serde_json::json!({})))
		.await
		.unwrap();

	// Simulate a runner that claimed the row and crashed an hour ago.
	let hour_ago = format_ts(Utc::now() - chrono::Duration::hours(1));
	sqlx::query(
		"UPDATE job_runs SET status = 'running', attempts = 1, lock_owner = 'crashed', locked_at = ?, started_at = ? WHERE id = ?",
	)
	.bind(&hour_ago)
	.bind(&hour_ago)
	.bind(&outcome.id)
	.execute(&pool)
	.await
	.unwrap();

	let report = queue.tick(TickOptions::default()).await.unwrap();
	let recovered = report.recovered.unwrap();
	assert_eq!(recovered.count, 1);
	assert_eq!(recovered.requeued, 1);

	let run_report = report.run.unwrap();
	assert_eq!(run_report.succeeded, 1);

	let done = queue.get_run(&outcome.id).await.unwrap();
	assert_eq!(done.status, JobRunStatus::Succeeded);
	assert_eq!(done.attempts, 2);
	assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_ticks_enqueue_each_occurrence_once() {
	let handler = ToggleHandler::new(false);
	let (queue, pool) = setup(handler).await;
	let due = Utc::now() - chrono::Duration::minutes(1);

	queue
		.upsert_schedule(UpsertJobSchedule {
			key: "hourly-scoring".to_string(),
			job_type: "lead_scoring".to_string(),
			payload_template: serde_json::json!({"batch": true}),
			priority: 0,
			max_attempts: 3,
			timeout_seconds: None,
			cadence_type: CadenceType::Interval,
			interval_minutes: Some(60),
			day_of_week: None,
			day_of_month: None,
			hour: None,
			minute: None,
			cron_expression: None,
			timezone: "UTC".to_string(),
			is_enabled: true,
			next_run_at: Some(due),
		})
		.await
		.unwrap();

	let schedules_only = TickOptions {
		run: false,
		recover_stale: false,
		..TickOptions::default()
	};
	let (a, b) = tokio::join!(queue.tick(schedules_only), queue.tick(schedules_only));
	let enqueued = a.unwrap().scheduled.unwrap().jobs_enqueued + b.unwrap().scheduled.unwrap().jobs_enqueued;
	assert_eq!(enqueued, 1);

	let third = queue.tick(schedules_only).await.unwrap();
	assert_eq!(third.scheduled.unwrap().jobs_enqueued, 0);
	assert!(third.run.is_none());
	assert!(third.recovered.is_none());

	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_runs WHERE source_id = 'hourly-scoring'")
		.fetch_one(&pool)
		.await
		.unwrap();
	assert_eq!(count, 1);

	let schedule = queue.get_schedule("hourly-scoring").await.unwrap();
	assert!(schedule.next_run_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn running_handler_observes_cancel() {
	let (queue, _pool) = setup(Arc::new(CooperativeHandler)).await;
	let outcome = queue
		.enqueue(EnqueueRequest::new("notification_digest", serde_json::json!({})))
		.await
		.unwrap();

	let worker = {
		let queue = queue.clone();
		tokio::spawn(async move { queue.run_once(1, "runner-a").await })
	};

	loop {
		let run = queue.get_run(&outcome.id).await.unwrap();
		if run.status == JobRunStatus::Running {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	let canceled = queue.cancel(&outcome.id).await.unwrap();
	assert_eq!(canceled.status, JobRunStatus::Canceled);

	let report = worker.await.unwrap().unwrap();
	assert_eq!(report.canceled, 1);
	assert_eq!(report.failed, 0);
	assert_eq!(queue.get_run(&outcome.id).await.unwrap().status, JobRunStatus::Canceled);

	assert!(matches!(queue.cancel(&outcome.id).await, Err(JobError::InvalidRequest(_))));
}

#[tokio::test]
async fn health_reports_dead_letters() {
	let handler = ToggleHandler::new(true);
	let (queue, _pool) = setup(handler).await;

	assert_eq!(queue.health().await.unwrap().status, opsdeck_server_jobs::HealthState::Healthy);

	queue
		.enqueue(EnqueueRequest::new("lead_scoring", serde_json::json!({})).with_max_attempts(1))
		.await
		.unwrap();
	queue.run_once(10, "runner-a").await.unwrap();

	let health = queue.health().await.unwrap();
	assert_eq!(health.status, opsdeck_server_jobs::HealthState::Degraded);
	assert_eq!(health.counts[&JobRunStatus::DeadLetter], 1);
}
