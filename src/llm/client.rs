use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::Invoker;
use super::error::InvocationError;
use crate::config::{LlmConfig, LocalLlmConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
// Local OpenAI-compatible servers generally ignore the key but some reject a missing header.
const LOCAL_PLACEHOLDER_KEY: &str = "sk-dummy";
const LOCAL_DEFAULT_MODEL: &str = "local-model";

/// Invoker for OpenAI-compatible `chat/completions` endpoints.
pub struct ChatInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
}

impl ChatInvoker {
    /// Create an invoker pointing at `base_url` (useful for testing).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: Option<String>,
    ) -> Result<Self, InvocationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model,
        })
    }

    /// Build from node configuration. A local server overrides the remote endpoint.
    pub fn from_config(llm: &LlmConfig, local: &LocalLlmConfig) -> Result<Self, InvocationError> {
        if local.enabled {
            let base_url = format!("http://localhost:{}/v1", local.port);
            let api_key = llm
                .api_key
                .clone()
                .or_else(|| Some(LOCAL_PLACEHOLDER_KEY.to_string()));
            let model = llm
                .model
                .clone()
                .or_else(|| Some(LOCAL_DEFAULT_MODEL.to_string()));
            return Self::with_base_url(base_url, api_key, model);
        }

        let base_url = llm
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url, llm.api_key.clone(), llm.model.clone())
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// The payload as sent: the job's own `model` wins over the configured default.
    fn prepare(&self, request_payload: &Value) -> Result<Value, InvocationError> {
        let Some(fields) = request_payload.as_object() else {
            return Err(InvocationError::InvalidRequest(
                "request payload must be a JSON object".into(),
            ));
        };
        let mut body = fields.clone();
        if let Some(model) = &self.default_model
            && !body.contains_key("model")
        {
            body.insert("model".into(), Value::String(model.clone()));
        }
        Ok(Value::Object(body))
    }
}

impl Invoker for ChatInvoker {
    async fn invoke(&self, request_payload: &Value) -> Result<Value, InvocationError> {
        let body = self.prepare(request_payload)?;

        let mut request = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000);
            return Err(InvocationError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(InvocationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
