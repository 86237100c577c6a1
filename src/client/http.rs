use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::QueueError;
use crate::queue::{EnqueuedJob, JobQueue, JobResult, JobSnapshot, LeasedJob};

/// Carries the job priority on enqueue so the body can be stored as sent.
pub const PRIORITY_HEADER: &str = "x-priority";

/// [`JobQueue`] backed by a broker reachable over HTTP.
pub struct HttpQueue {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct PollResponse {
    jobs: Vec<JobSnapshot>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    updated: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpQueue {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, QueueError> {
        // No idle connections survive between polls.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn request(&self, path: &str, body: &Value) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, QueueError> {
        self.send(self.request(path, body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, QueueError> {
        let response = request.send().await?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(QueueError::Unauthorized);
        }

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(QueueError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

impl JobQueue for HttpQueue {
    async fn enqueue(&self, request_payload: Value, priority: i64) -> Result<EnqueuedJob, QueueError> {
        let request = self
            .request("/v1/chat/completions", &request_payload)
            .header(PRIORITY_HEADER, priority);
        self.send(request).await
    }

    async fn lease(&self, limit: usize) -> Result<Vec<LeasedJob>, QueueError> {
        self.post("/internal/queue/fetch", &json!({ "limit": limit }))
            .await
    }

    async fn submit_results(&self, results: Vec<JobResult>) -> Result<usize, QueueError> {
        let body = serde_json::to_value(&results)
            .map_err(|e| QueueError::Internal(format!("failed to encode results: {e}")))?;
        let response: SubmitResponse = self.post("/internal/queue/submit", &body).await?;
        Ok(response.updated)
    }

    async fn poll(&self, ids: Option<Vec<String>>) -> Result<Vec<JobSnapshot>, QueueError> {
        let body = match ids {
            Some(ids) => json!({ "ids": ids }),
            None => json!({}),
        };
        let response: PollResponse = self.post("/v1/results/poll", &body).await?;
        Ok(response.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobStatus;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn queue(server: &MockServer) -> HttpQueue {
        HttpQueue::new(server.uri(), "sk-test").unwrap()
    }

    #[tokio::test]
    async fn enqueue_sends_priority_as_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header(PRIORITY_HEADER, "3"))
            .and(body_json(json!({"prompt": "hi", "priority": "high"})))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(json!({"id": "j1", "status": "QUEUED"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let job = queue(&server)
            .enqueue(json!({"prompt": "hi", "priority": "high"}), 3)
            .await
            .unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn lease_posts_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/queue/fetch"))
            .and(body_json(json!({"limit": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "a", "request_payload": {"prompt": "x"}, "created_at": "2026-01-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let jobs = queue(&server).lease(2).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].request_payload["prompt"], "x");
    }

    #[tokio::test]
    async fn submit_returns_updated_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/queue/submit"))
            .and(body_json(json!([
                {"id": "a", "status": "COMPLETED", "result": "ok"},
                {"id": "b", "status": "FAILED", "error": "nope"}
            ])))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "updated": 2})),
            )
            .mount(&server)
            .await;

        let updated = queue(&server)
            .submit_results(vec![
                JobResult::completed("a", json!("ok")),
                JobResult::failed("b", "nope"),
            ])
            .await
            .unwrap();
        assert_eq!(updated, 2);
    }

    #[tokio::test]
    async fn poll_unwraps_jobs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/results/poll"))
            .and(body_json(json!({"ids": ["a"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [{"id": "a", "status": "PROCESSING", "result": null}]
            })))
            .mount(&server)
            .await;

        let snaps = queue(&server).poll(Some(vec!["a".into()])).await.unwrap();
        assert_eq!(snaps[0].status, JobStatus::Processing);
        assert!(snaps[0].result.is_none());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false, "message": "Invalid API Key"
            })))
            .mount(&server)
            .await;

        let err = queue(&server).poll(None).await.unwrap_err();
        assert!(matches!(err, QueueError::Unauthorized));
    }

    #[tokio::test]
    async fn server_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false, "message": "Storage error: disk full"
            })))
            .mount(&server)
            .await;

        match queue(&server).lease(1).await.unwrap_err() {
            QueueError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Storage error: disk full");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
