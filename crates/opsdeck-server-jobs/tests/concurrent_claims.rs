// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opsdeck_server_db::testing::create_file_job_test_pool;
use opsdeck_server_db::{create_pool, JobRunStatus};
use opsdeck_server_jobs::{
	generate_runner_id, EnqueueRequest, HandlerRegistry, JobContext, JobHandler, JobQueue, QueueSettings,
};

struct RecordingHandler {
	seen: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl JobHandler for RecordingHandler {
	fn job_type(&self) -> &str {
		"delivery_snapshot"
	}

	async fn run(&self, ctx: &JobContext, _payload: &serde_json::Value) -> opsdeck_server_jobs::Result<()> {
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		let mut seen = self.seen.lock().unwrap();
		*seen.entry(ctx.run_id.clone()).or_insert(0) += 1;
		Ok(())
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runners_never_share_a_run() {
	let dir = tempfile::tempdir().unwrap();
	let first_pool = create_file_job_test_pool(dir.path()).await;
	let url = format!("sqlite:{}", dir.path().join("jobs.db").display());

	let handler = Arc::new(RecordingHandler {
		seen: Mutex::new(HashMap::new()),
	});
	let mut registry = HandlerRegistry::new();
	registry.register(handler.clone());
	let registry = Arc::new(registry);

	let seed = JobQueue::new(first_pool, (*registry).clone(), QueueSettings::default());
	let mut ids = Vec::new();
	for n in 0..40 {
		let outcome = seed
			.enqueue(EnqueueRequest::new("delivery_snapshot", serde_json::json!({ "n": n })))
			.await
			.unwrap();
		ids.push(outcome.id);
	}

	let mut workers = Vec::new();
	for _ in 0..4 {
		let pool = create_pool(&url).await.unwrap();
		let queue = JobQueue::new(pool, (*registry).clone(), QueueSettings::default());
		workers.push(tokio::spawn(async move {
			let mut claimed = 0;
			loop {
				let report = queue.run_once(5, &generate_runner_id()).await.unwrap();
				if report.claimed == 0 {
					break;
				}
				claimed += report.claimed;
			}
			claimed
		}));
	}

	let mut total = 0;
	for worker in workers {
		total += worker.await.unwrap();
	}
	assert_eq!(total, 40);

	let seen = handler.seen.lock().unwrap();
	assert_eq!(seen.len(), 40);
	assert!(seen.values().all(|count| *count == 1));

	for id in ids {
		let run = seed.get_run(&id).await.unwrap();
		assert_eq!(run.status, JobRunStatus::Succeeded);
		assert_eq!(run.attempts, 1);
	}
}
