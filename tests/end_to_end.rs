//! Full round trip over HTTP: a client submits, a worker node leases and
//! answers through a model stub, and the client's wait sees the result.

use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inferq::auth::Role;
use inferq::client::{Client, HttpQueue};
use inferq::error::QueueError;
use inferq::llm::ChatInvoker;
use inferq::queue::{Broker, JobQueue, JobStatus, JobStore};
use inferq::server;
use inferq::worker::Worker;

struct Harness {
    _dir: TempDir,
    url: String,
    user_key: String,
    node_key: String,
    shutdown: CancellationToken,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("queue.db")).unwrap();
        let broker = Broker::new(store);
        let user_key = broker.gate().issue("alice", Role::User).unwrap();
        let node_key = broker.gate().issue("gpu-1", Role::Node).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(server::serve(listener, broker, shutdown.clone()));

        Self {
            _dir: dir,
            url,
            user_key,
            node_key,
            shutdown,
        }
    }

    fn queue(&self, key: &str) -> HttpQueue {
        HttpQueue::new(&self.url, key).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn model_stub() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "pong"}}]
        })))
        .mount(&server)
        .await;
    server
}

fn chat(content: &str) -> Value {
    json!({"model": "test-model", "messages": [{"role": "user", "content": content}]})
}

#[tokio::test]
async fn submit_process_and_wait() {
    let harness = Harness::start().await;
    let model = model_stub().await;

    let client = Client::new(harness.queue(&harness.user_key))
        .with_poll_interval(Duration::from_millis(20));
    let mut handle = client.submit(chat("ping"), 0).await.unwrap();
    assert_eq!(handle.status(), Some(JobStatus::Queued));

    let invoker = ChatInvoker::with_base_url(format!("{}/v1", model.uri()), None, None).unwrap();
    let worker = Worker::new(harness.queue(&harness.node_key), invoker);
    assert_eq!(worker.drain().await, 1);

    let result = handle.get(true, Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(result["choices"][0]["message"]["content"], "pong");
    assert_eq!(handle.status(), Some(JobStatus::Completed));
}

#[tokio::test]
async fn model_failure_becomes_failed_job() {
    let harness = Harness::start().await;
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&model)
        .await;

    let client = Client::new(harness.queue(&harness.user_key));
    let id = client.submit(chat("ping"), 0).await.unwrap().id().to_string();

    let invoker = ChatInvoker::with_base_url(model.uri(), None, None).unwrap();
    let worker = Worker::new(harness.queue(&harness.node_key), invoker);
    worker.run_once().await;

    let snaps = client
        .wait_all(std::slice::from_ref(&id), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(snaps[0].status, JobStatus::Failed);
    let error = snaps[0].result.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(error.contains("503"), "unexpected error text: {error}");
}

#[tokio::test]
async fn priority_orders_leases() {
    let harness = Harness::start().await;
    let producer = harness.queue(&harness.user_key);
    let low = producer.enqueue(chat("low"), 0).await.unwrap();
    let high = producer.enqueue(chat("high"), 9).await.unwrap();

    let node = harness.queue(&harness.node_key);
    let leased = node.lease(10).await.unwrap();
    let order: Vec<&str> = leased.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(order, [high.id.as_str(), low.id.as_str()]);
    assert!(leased[0].request_payload.get("priority").is_none());

    assert!(node.lease(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_nodes_never_share_a_job() {
    let harness = Harness::start().await;
    let producer = harness.queue(&harness.user_key);
    for i in 0..20 {
        producer.enqueue(chat(&format!("job {i}")), 0).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let node = harness.queue(&harness.node_key);
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            loop {
                let batch = node.lease(3).await.unwrap();
                if batch.is_empty() {
                    return ids;
                }
                ids.extend(batch.into_iter().map(|j| j.id));
            }
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}

#[tokio::test]
async fn bad_key_is_rejected() {
    let harness = Harness::start().await;
    let queue = harness.queue("sk-not-a-real-key");

    assert!(matches!(
        queue.enqueue(chat("x"), 0).await,
        Err(QueueError::Unauthorized)
    ));
    assert!(matches!(queue.lease(1).await, Err(QueueError::Unauthorized)));
}

#[tokio::test]
async fn wait_times_out_without_workers() {
    let harness = Harness::start().await;
    let client = Client::new(harness.queue(&harness.user_key))
        .with_poll_interval(Duration::from_millis(20));
    let mut handle = client.submit(chat("nobody home"), 0).await.unwrap();

    let err = handle.get(true, Duration::from_millis(150)).await.unwrap_err();
    assert!(matches!(err, QueueError::Timeout { .. }));
    assert_eq!(handle.status(), Some(JobStatus::Queued));
}
