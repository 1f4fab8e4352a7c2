//! Integration tests for the full relay pipeline.
//!
//! Tests: Intake → TaskQueue → DispatchWorker → JobDispatcher → Store / Transport → Lookup
//!
//! Verifies:
//! - A created job is dispatched to the backend and relayed to the webhook
//! - Duplicate deliveries are tolerated
//! - Backend failures and time limits leave the job in flight without a webhook

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use hookrelay_core::{EndpointShape, HeaderList, HttpMethod, JobState, NewJob};

    use crate::config::test_config;
    use crate::dispatcher::JobDispatcher;
    use crate::http_client::testing::{Script, ScriptedTransport};
    use crate::intake::JobIntake;
    use crate::lookup::JobLookup;
    use crate::queue::{DispatchTask, InMemoryTaskQueue, TaskQueue};
    use crate::store::{InMemoryJobStore, JobStore};
    use crate::workers::{DispatchWorker, DispatchWorkerConfig, TaskReport};

    const BACKEND: &str = "http://backend.test:11434";
    const WEBHOOK: &str = "http://hooks.test/ollama";
    const ORIGIN: &str = "http://relay.test:11435";
    const PROMPT: &[u8] = br#"{"model":"llama3.2","prompt":"Tell me a joke."}"#;

    struct Relay {
        store: Arc<InMemoryJobStore>,
        queue: Arc<InMemoryTaskQueue>,
        transport: Arc<ScriptedTransport>,
        intake: JobIntake,
        lookup: JobLookup,
        worker: DispatchWorker,
    }

    fn setup() -> Relay {
        let config = Arc::new(test_config(BACKEND, WEBHOOK));
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let transport = Arc::new(ScriptedTransport::new());

        let dispatcher = Arc::new(JobDispatcher::new(config.clone(), store.clone(), transport.clone()));
        Relay {
            intake: JobIntake::new(config.clone(), store.clone(), queue.clone()),
            lookup: JobLookup::new(config, store.clone()),
            worker: DispatchWorker::new(queue.clone(), dispatcher),
            store,
            queue,
            transport,
        }
    }

    fn worker_config() -> DispatchWorkerConfig {
        DispatchWorkerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_time_limits(Duration::from_secs(1), Duration::from_secs(2))
    }

    fn generate_request() -> NewJob {
        NewJob {
            method: HttpMethod::Post,
            path: "/api/generate".to_string(),
            query: String::new(),
            headers: HeaderList::from_pairs([("content-type", "application/json")]),
            body: PROMPT.to_vec(),
        }
    }

    #[tokio::test]
    async fn generate_request_is_relayed_end_to_end() {
        let relay = setup();
        let backend_reply = br#"{"model":"llama3.2","response":"Why did the llama cross the road?","done":true}"#;
        relay.transport.route(BACKEND, Script::ok(backend_reply));

        let receipt = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap();
        let id = receipt.job.id;
        let preview = receipt.body();
        assert!(preview["response"].as_str().unwrap().contains(&id.to_string()));

        let report = relay.worker.run_next(&worker_config()).await.unwrap().unwrap();
        assert!(matches!(report, TaskReport::Succeeded(_)));

        let backend_calls = relay.transport.requests_to(BACKEND);
        assert_eq!(backend_calls.len(), 1);
        assert_eq!(backend_calls[0].method, HttpMethod::Post);
        assert_eq!(backend_calls[0].url.as_str(), format!("{BACKEND}/api/generate"));
        assert_eq!(backend_calls[0].body, PROMPT);

        let hooks = relay.transport.requests_to(WEBHOOK);
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].url.query(), Some(format!("job={id}").as_str()));
        assert_eq!(hooks[0].body, backend_reply);

        let job = relay.store.get(id).await.unwrap();
        assert_eq!(job.state(), JobState::Responded);
        assert!(job.request_sent_at.unwrap() <= job.response_received_at.unwrap());
        assert_eq!(job.response_content, backend_reply);
        assert_eq!(job.response_headers.get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn lookup_tracks_dispatch_and_is_stable_once_settled() {
        let relay = setup();
        relay.transport.route(BACKEND, Script::ok(br#"{"done":true}"#));
        let id = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id;

        let before = relay.lookup.get_job(id, ORIGIN).await.unwrap().to_json(EndpointShape::Generic);
        assert_eq!(before["state"], "queued");

        relay.worker.run_next(&worker_config()).await.unwrap().unwrap();

        let after = relay.lookup.get_job(id, ORIGIN).await.unwrap().to_json(EndpointShape::Generic);
        assert_eq!(after["state"], "responded");
        assert_eq!(after["response_content"], r#"{"done":true}"#);
        assert_eq!(after["created_at"], before["created_at"]);
        assert_eq!(after["url"], before["url"]);

        let again = relay.lookup.get_job(id, ORIGIN).await.unwrap().to_json(EndpointShape::Generic);
        assert_eq!(serde_json::to_vec(&after).unwrap(), serde_json::to_vec(&again).unwrap());
    }

    #[tokio::test]
    async fn duplicate_delivery_fires_webhook_per_execution_and_last_write_wins() {
        let relay = setup();
        let id = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id;
        relay.queue.enqueue(DispatchTask { job_id: id }).await.unwrap();

        relay.transport.route(BACKEND, Script::ok(b"first"));
        relay.worker.run_next(&worker_config()).await.unwrap().unwrap();
        let first = relay.store.get(id).await.unwrap();

        relay.transport.route(BACKEND, Script::ok(b"second"));
        let report = relay.worker.run_next(&worker_config()).await.unwrap().unwrap();
        assert!(matches!(report, TaskReport::Succeeded(_)));

        let job = relay.store.get(id).await.unwrap();
        assert_eq!(job.request_sent_at, first.request_sent_at);
        assert_eq!(job.response_content, b"second");
        assert!(job.response_received_at >= first.response_received_at);

        let hooks = relay.transport.requests_to(WEBHOOK);
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].body, b"first");
        assert_eq!(hooks[1].body, b"second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_executions_both_succeed() {
        let relay = setup();
        relay
            .transport
            .route(BACKEND, Script::ok(b"{\"done\":true}").after(Duration::from_millis(50)));
        let id = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id;
        relay.queue.enqueue(DispatchTask { job_id: id }).await.unwrap();

        let config = worker_config();
        let (a, b) = tokio::join!(relay.worker.run_next(&config), relay.worker.run_next(&config));
        assert!(matches!(a.unwrap(), Some(TaskReport::Succeeded(_))));
        assert!(matches!(b.unwrap(), Some(TaskReport::Succeeded(_))));

        let job = relay.store.get(id).await.unwrap();
        assert_eq!(job.state(), JobState::Responded);
        assert!(job.request_sent_at.unwrap() <= job.response_received_at.unwrap());
        assert_eq!(relay.transport.requests_to(WEBHOOK).len(), 2);
        assert_eq!(relay.worker.stats().tasks_succeeded, 2);
    }

    #[tokio::test]
    async fn backend_timeout_leaves_job_in_flight_without_webhook() {
        let relay = setup();
        relay.transport.route(BACKEND, Script::timeout());
        let id = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id;

        let report = relay.worker.run_next(&worker_config()).await.unwrap().unwrap();
        match report {
            TaskReport::Failed(err) => assert!(err.is_backend_timeout()),
            other => panic!("expected failure, got {other:?}"),
        }

        let job = relay.store.get(id).await.unwrap();
        assert!(job.request_sent_at.is_some());
        assert!(job.response_received_at.is_none());
        assert!(relay.transport.requests_to(WEBHOOK).is_empty());

        let failed = relay.queue.failed_tasks();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.job_id, id);
        assert!(failed[0].1.contains("backend call failed"));

        // A poller sees the job stuck in flight.
        let polled = relay.lookup.get_job(id, ORIGIN).await.unwrap().to_json(EndpointShape::Generic);
        assert_eq!(polled["state"], "in_flight");
        assert!(polled["request_sent_at"].is_string());
        assert!(polled["response_received_at"].is_null());
    }

    #[tokio::test]
    async fn hard_time_limit_cancels_slow_dispatch() {
        let relay = setup();
        relay
            .transport
            .route(BACKEND, Script::ok(b"late").after(Duration::from_millis(500)));
        let id = relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id;

        let config = worker_config().with_time_limits(Duration::from_millis(20), Duration::from_millis(100));
        let report = relay.worker.run_next(&config).await.unwrap().unwrap();
        assert_eq!(
            report,
            TaskReport::TimedOut {
                limit: Duration::from_millis(100)
            }
        );

        let job = relay.store.get(id).await.unwrap();
        assert_eq!(job.state(), JobState::InFlight);
        assert!(relay.transport.requests_to(WEBHOOK).is_empty());
        assert_eq!(relay.queue.failed_tasks().len(), 1);

        let stats = relay.worker.stats();
        assert_eq!(stats.tasks_timed_out, 1);
        assert_eq!(stats.tasks_processed, 1);
        assert_eq!(stats.current_running, 0);
    }

    #[tokio::test]
    async fn deleted_job_fails_its_delivery() {
        let relay = setup();
        let missing = hookrelay_core::JobId::new();
        relay.queue.enqueue(DispatchTask { job_id: missing }).await.unwrap();

        let report = relay.worker.run_next(&worker_config()).await.unwrap().unwrap();
        assert!(matches!(report, TaskReport::Failed(crate::dispatcher::DispatchError::JobNotFound(id)) if id == missing));
        assert!(relay.transport.requests_to("http").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_pool_drains_queue_and_shuts_down() {
        let relay = setup();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(relay.intake.create_job(generate_request(), ORIGIN).await.unwrap().job.id);
        }

        let handle = relay.worker.clone().spawn(worker_config().with_concurrency(3));

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while handle.stats().tasks_processed < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "workers did not drain the queue");

        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.tasks_succeeded, 5);
        assert_eq!(relay.queue.pending(), 0);
        for id in ids {
            assert_eq!(relay.store.get(id).await.unwrap().state(), JobState::Responded);
        }
        assert_eq!(relay.transport.requests_to(WEBHOOK).len(), 5);
    }
}
