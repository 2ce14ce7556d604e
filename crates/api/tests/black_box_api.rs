use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use pushrelay_api::app::{build_app, AppServices};
use pushrelay_core::BackoffPolicy;
use pushrelay_infra::provider::{
    BatchOutcome, ProviderError, PushMessage, PushProvider,
};
use pushrelay_infra::store::{InMemoryTaskStore, TaskStore};
use pushrelay_infra::worker::{WorkerConfig, WorkerPool};
use pushrelay_infra::ShutdownSignal;

const AUTH_TOKEN: &str = "test-token";

/// Provider double returning a fixed message id, optionally failing first.
struct StubProvider {
    failures_before_success: std::sync::Mutex<u32>,
    message_id: String,
}

impl StubProvider {
    fn succeeding(message_id: &str) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success: std::sync::Mutex::new(0),
            message_id: message_id.to_string(),
        })
    }

    fn failing_then_succeeding(failures: u32, message_id: &str) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success: std::sync::Mutex::new(failures),
            message_id: message_id.to_string(),
        })
    }
}

#[async_trait]
impl PushProvider for StubProvider {
    async fn send(&self, _message: &PushMessage) -> Result<String, ProviderError> {
        let mut remaining = self.failures_before_success.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ProviderError::retryable("stubbed outage"));
        }
        Ok(self.message_id.clone())
    }

    async fn send_batch(&self, messages: &[PushMessage]) -> Result<BatchOutcome, ProviderError> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.send(message).await);
        }
        Ok(BatchOutcome::from_results(results))
    }
}

struct TestServer {
    base_url: String,
    store: Arc<InMemoryTaskStore>,
    shutdown: ShutdownSignal,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Bind the production router to an ephemeral port over an in-memory
    /// store. No workers: enqueued tasks stay pending.
    async fn spawn() -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        Self::spawn_with_store(store).await
    }

    async fn spawn_with_store(store: Arc<InMemoryTaskStore>) -> Self {
        let services = Arc::new(AppServices {
            store: store.clone() as Arc<dyn TaskStore>,
            default_max_attempts: 3,
        });
        let app = build_app(
            services,
            Some(AUTH_TOKEN.to_string()),
            Duration::from_secs(10),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            shutdown: ShutdownSignal::new(),
            handle,
        }
    }

    /// Additionally run a worker pool against the same store.
    fn start_workers(&self, provider: Arc<dyn PushProvider>, backoff: BackoffPolicy) {
        let pool = WorkerPool::new(
            self.store.clone() as Arc<dyn TaskStore>,
            provider,
            backoff,
            WorkerConfig {
                worker_count: 2,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            self.shutdown.clone(),
        );
        pool.start();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.handle.abort();
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn enqueue(srv: &TestServer, body: serde_json::Value) -> reqwest::Response {
    client()
        .post(format!("{}/api/v1/push/send", srv.base_url))
        .bearer_auth(AUTH_TOKEN)
        .json(&body)
        .send()
        .await
        .unwrap()
}

/// Poll the status endpoint until the task reaches the wanted status.
async fn status_eventually(srv: &TestServer, id: &str, wanted: &str) -> serde_json::Value {
    for _ in 0..100 {
        let res = client()
            .get(format!("{}/api/v1/queue/status/{}", srv.base_url, id))
            .bearer_auth(AUTH_TOKEN)
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == wanted {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not reach status {:?} in time", id, wanted);
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let srv = TestServer::spawn().await;

    let res = client()
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "pushrelay");
}

#[tokio::test]
async fn api_requires_a_matching_bearer_token() {
    let srv = TestServer::spawn().await;
    let url = format!("{}/api/v1/queue/stats", srv.base_url);

    let missing = client().get(&url).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = client()
        .get(&url)
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let right = client()
        .get(&url)
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(right.status(), StatusCode::OK);
}

#[tokio::test]
async fn enqueue_returns_accepted_with_pending_status() {
    let srv = TestServer::spawn().await;

    let res = enqueue(
        &srv,
        json!({"token": "T1", "title": "Hi", "body": "Yo", "priority": "normal"}),
    )
    .await;

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    let id = body["queue_task_id"].as_str().unwrap();

    let status = client()
        .get(format!("{}/api/v1/queue/status/{}", srv.base_url, id))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status: serde_json::Value = status.json().await.unwrap();
    assert_eq!(status["status"], "pending");
    assert_eq!(status["attempts"], 0);
}

#[tokio::test]
async fn enqueued_task_is_delivered_by_the_worker_pool() {
    let srv = TestServer::spawn().await;
    srv.start_workers(StubProvider::succeeding("m1"), BackoffPolicy::default());

    let res = enqueue(&srv, json!({"token": "T1", "title": "Hi", "body": "Yo"})).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["queue_task_id"].as_str().unwrap().to_string();

    let done = status_eventually(&srv, &id, "success").await;
    assert_eq!(done["provider_message_id"], "m1");
    assert_eq!(done["attempts"], 1);
}

#[tokio::test]
async fn transient_provider_failure_is_retried_to_success() {
    let srv = TestServer::spawn().await;
    let backoff = BackoffPolicy::new(vec![Duration::from_millis(10)]).unwrap();
    srv.start_workers(StubProvider::failing_then_succeeding(1, "m2"), backoff);

    let res = enqueue(&srv, json!({"token": "T1", "title": "Hi", "body": "Yo"})).await;
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["queue_task_id"].as_str().unwrap().to_string();

    let done = status_eventually(&srv, &id, "success").await;
    assert_eq!(done["provider_message_id"], "m2");
    assert_eq!(done["attempts"], 2);
    assert_eq!(done["error_message"], "stubbed outage");
}

#[tokio::test]
async fn validation_failures_return_the_error_shape() {
    let srv = TestServer::spawn().await;

    let cases = [
        json!({"title": "Hi", "body": "Yo"}),
        json!({"token": "T1", "body": "Yo"}),
        json!({"token": "T1", "title": "Hi"}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "priority": "urgent"}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "max_attempts": 0}),
        json!({"token": "  ", "title": "Hi", "body": "Yo"}),
        // Type mismatches must take the same validation path.
        json!({"token": 7, "title": "Hi", "body": "Yo"}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "priority": 5}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "data": {"k": 1}}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "data": ["k", "v"]}),
        json!({"token": "T1", "title": "Hi", "body": "Yo", "max_attempts": "three"}),
    ];

    for case in cases {
        let res = enqueue(&srv, case.clone()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "case: {}", case);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error", "case: {}", case);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    // Nothing was persisted.
    let stats: serde_json::Value = client()
        .get(format!("{}/api/v1/queue/stats", srv.base_url))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_count"], 0);
}

#[tokio::test]
async fn batch_bounds_are_enforced() {
    let srv = TestServer::spawn().await;
    let url = format!("{}/api/v1/push/send-batch", srv.base_url);

    let empty = client()
        .post(&url)
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({"notifications": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let oversized: Vec<serde_json::Value> = (0..501)
        .map(|i| json!({"token": format!("T{}", i), "title": "Hi", "body": "Yo"}))
        .collect();
    let too_many = client()
        .post(&url)
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({"notifications": oversized}))
        .send()
        .await
        .unwrap();
    assert_eq!(too_many.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_elements_fail_independently() {
    let srv = TestServer::spawn().await;

    let res = client()
        .post(format!("{}/api/v1/push/send-batch", srv.base_url))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({"notifications": [
            {"token": "T1", "title": "Hi", "body": "Yo"},
            {"title": "missing token", "body": "Yo"},
            {"token": "T3", "title": "Hi", "body": "Yo", "priority": "high"},
        ]}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["queued_count"], 2);

    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks[0]["id"].is_string());
    assert_eq!(tasks[0]["status"], "pending");
    assert!(tasks[1]["id"].is_null());
    assert_eq!(tasks[1]["status"], "failed");
    assert!(tasks[1]["error_message"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(tasks[2]["id"].is_string());
}

#[tokio::test]
async fn status_rejects_bad_ids_and_unknown_tasks() {
    let srv = TestServer::spawn().await;

    let bad = client()
        .get(format!("{}/api/v1/queue/status/not-a-uuid", srv.base_url))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = bad.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let unknown = client()
        .get(format!(
            "{}/api/v1/queue/status/{}",
            srv.base_url,
            uuid_like_but_absent()
        ))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

fn uuid_like_but_absent() -> &'static str {
    "0191f4b2-7c1e-7000-8000-000000000000"
}

#[tokio::test]
async fn history_pages_concatenate_to_the_full_scan() {
    let srv = TestServer::spawn().await;

    for i in 0..7 {
        let res = enqueue(
            &srv,
            json!({"token": format!("T{}", i), "title": "Hi", "body": "Yo", "client_id": "app-1"}),
        )
        .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    let full: serde_json::Value = client()
        .get(format!(
            "{}/api/v1/queue/history?client_id=app-1",
            srv.base_url
        ))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(full["total"], 7);
    let full_ids: Vec<String> = full["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(full_ids.len(), 7);

    let mut paged_ids = Vec::new();
    for page in 0..3 {
        let res: serde_json::Value = client()
            .get(format!(
                "{}/api/v1/queue/history?client_id=app-1&limit=3&offset={}",
                srv.base_url,
                page * 3
            ))
            .bearer_auth(AUTH_TOKEN)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(res["total"], 7);
        assert_eq!(res["limit"], 3);
        paged_ids.extend(
            res["tasks"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["id"].as_str().unwrap().to_string()),
        );
    }
    assert_eq!(paged_ids, full_ids);
}

#[tokio::test]
async fn history_rejects_malformed_query_values() {
    let srv = TestServer::spawn().await;

    for query in [
        "status=done",
        "start_date=yesterday",
        "limit=lots",
    ] {
        let res = client()
            .get(format!("{}/api/v1/queue/history?{}", srv.base_url, query))
            .bearer_auth(AUTH_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "query: {}", query);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }
}

#[tokio::test]
async fn stats_reflect_queue_contents() {
    let srv = TestServer::spawn().await;

    for i in 0..3 {
        enqueue(&srv, json!({"token": format!("T{}", i), "title": "Hi", "body": "Yo"})).await;
    }

    let stats: serde_json::Value = client()
        .get(format!("{}/api/v1/queue/stats", srv.base_url))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(stats["pending_count"], 3);
    assert_eq!(stats["processing_count"], 0);
    assert_eq!(stats["success_count"], 0);
    assert_eq!(stats["failed_count"], 0);
    assert_eq!(stats["total_count"], 3);
}
