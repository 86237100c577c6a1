//! HTTP binding of the broker operations.
//!
//! | Method | Path                      | Operation      |
//! |--------|---------------------------|----------------|
//! | POST   | `/v1/chat/completions`    | enqueue (202)  |
//! | POST   | `/v1/results/poll`        | query          |
//! | POST   | `/internal/queue/fetch`   | lease          |
//! | POST   | `/internal/queue/submit`  | submit results |
//! | GET    | `/health`                 | liveness       |
//!
//! Every route except `/health` requires `Authorization: Bearer <key>`.

pub mod error;
pub mod routes;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::queue::Broker;

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
}

/// Create the API router with all endpoints
pub fn router(broker: Broker) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/v1/chat/completions", post(routes::enqueue))
        .route("/v1/results/poll", post(routes::poll_results))
        .route("/internal/queue/fetch", post(routes::fetch_jobs))
        .route("/internal/queue/submit", post(routes::submit_results))
        .with_state(AppState { broker })
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    broker: Broker,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Broker listening");

    axum::serve(listener, router(broker))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Broker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::client::{HttpQueue, PRIORITY_HEADER};
    use crate::queue::{JobQueue, JobStatus, JobStore, LocalQueue};
    use serde_json::{Value, json};
    use std::net::SocketAddr;

    struct TestServer {
        addr: SocketAddr,
        broker: Broker,
        shutdown: CancellationToken,
        http: reqwest::Client,
    }

    impl TestServer {
        async fn start() -> Self {
            let broker = Broker::new(JobStore::in_memory().unwrap());
            broker.gate().register("sk-user", "alice", Role::User).unwrap();
            broker.gate().register("sk-node", "node-1", Role::Node).unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let shutdown = CancellationToken::new();
            tokio::spawn(serve(listener, broker.clone(), shutdown.clone()));

            Self {
                addr,
                broker,
                shutdown,
                http: reqwest::Client::new(),
            }
        }

        async fn post(&self, path: &str, key: Option<&str>, body: Value) -> reqwest::Response {
            let mut req = self
                .http
                .post(format!("http://{}{}", self.addr, path))
                .json(&body);
            if let Some(key) = key {
                req = req.bearer_auth(key);
            }
            req.send().await.unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    #[tokio::test]
    async fn health_needs_no_credential() {
        let server = TestServer::start().await;
        let resp = server
            .http
            .get(format!("http://{}/health", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "healthy");
    }

    #[tokio::test]
    async fn missing_or_unknown_credential_is_401() {
        let server = TestServer::start().await;
        for key in [None, Some("sk-bogus")] {
            let resp = server
                .post("/v1/chat/completions", key, json!({"prompt": "x"}))
                .await;
            assert_eq!(resp.status(), 401);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["success"], false);
        }
        let queued = server
            .broker
            .store()
            .list_by_status(JobStatus::Queued, 10)
            .unwrap();
        assert!(queued.is_empty());
    }

    #[tokio::test]
    async fn enqueue_returns_202_and_keeps_body_intact() {
        let server = TestServer::start().await;
        let resp = server
            .post(
                "/v1/chat/completions",
                Some("sk-user"),
                json!({"prompt": "x", "priority": 5}),
            )
            .await;
        assert_eq!(resp.status(), 202);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "QUEUED");

        let id = body["id"].as_str().unwrap();
        let job = server.broker.store().get(id).unwrap().unwrap();
        assert_eq!(job.priority, 5);
        assert_eq!(job.request_payload, json!({"prompt": "x", "priority": 5}));
    }

    #[tokio::test]
    async fn bad_priority_header_is_400() {
        let server = TestServer::start().await;
        let resp = server
            .http
            .post(format!("http://{}/v1/chat/completions", server.addr))
            .bearer_auth("sk-user")
            .header(PRIORITY_HEADER, "urgent")
            .json(&json!({"prompt": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn non_integer_body_priority_is_stored_as_sent() {
        let server = TestServer::start().await;
        let resp = server
            .post(
                "/v1/chat/completions",
                Some("sk-user"),
                json!({"prompt": "x", "priority": "urgent"}),
            )
            .await;
        assert_eq!(resp.status(), 202);
        let body: Value = resp.json().await.unwrap();
        let job = server.broker.store().get(body["id"].as_str().unwrap()).unwrap().unwrap();
        assert_eq!(job.priority, 0);
        assert_eq!(job.request_payload["priority"], "urgent");
    }

    #[tokio::test]
    async fn http_and_local_enqueue_store_the_same_payload() {
        let server = TestServer::start().await;
        let remote = HttpQueue::new(format!("http://{}", server.addr), "sk-user").unwrap();
        let local = LocalQueue::new(server.broker.clone(), "sk-user");

        for (payload, priority) in [
            (json!({"prompt": "x", "priority": "high"}), 0),
            (json!({"prompt": "y", "priority": 9}), 2),
            (json!(["not", "an", "object"]), 4),
        ] {
            let over_http = remote.enqueue(payload.clone(), priority).await.unwrap();
            let in_process = local.enqueue(payload.clone(), priority).await.unwrap();

            let store = server.broker.store();
            let a = store.get(&over_http.id).unwrap().unwrap();
            let b = store.get(&in_process.id).unwrap().unwrap();
            assert_eq!(a.request_payload, payload);
            assert_eq!(a.request_payload, b.request_payload);
            assert_eq!(a.priority, priority);
            assert_eq!(a.priority, b.priority);
        }
    }

    #[tokio::test]
    async fn fetch_and_submit_round() {
        let server = TestServer::start().await;
        let body: Value = server
            .post("/v1/chat/completions", Some("sk-user"), json!({"prompt": "x"}))
            .await
            .json()
            .await
            .unwrap();
        let id = body["id"].as_str().unwrap().to_string();

        let leased: Value = server
            .post("/internal/queue/fetch", Some("sk-node"), json!({}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(leased[0]["id"], id.as_str());

        let resp = server
            .post(
                "/internal/queue/submit",
                Some("sk-node"),
                json!([{"id": id, "status": "COMPLETED", "result": {"text": "done"}}]),
            )
            .await;
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok", "updated": 1}));

        let body: Value = server
            .post("/v1/results/poll", Some("sk-user"), json!({"ids": [id]}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["jobs"][0]["status"], "COMPLETED");
        assert_eq!(body["jobs"][0]["result"], json!({"text": "done"}));
    }

    #[tokio::test]
    async fn submit_rejects_non_terminal_status() {
        let server = TestServer::start().await;
        let resp = server
            .post(
                "/internal/queue/submit",
                Some("sk-node"),
                json!([{"id": "x", "status": "QUEUED"}]),
            )
            .await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown() {
        let broker = Broker::new(JobStore::in_memory().unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, broker, shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
