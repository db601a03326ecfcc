//! Langflow API client: a single POST to the run-flow endpoint per query.

use serde::Serialize;
use std::time::Duration;

/// Replies larger than this are treated as an error rather than parsed.
const MAX_RESPONSE_BYTES: usize = 1_048_576;

/// Sender identity forwarded to flows that personalize responses.
#[derive(Debug, Clone, Default)]
pub struct SenderIdentity {
    /// Display name (e.g. Telegram first + last name).
    pub name: Option<String>,
    /// Handle (e.g. Telegram username).
    pub handle: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("flow api error: status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("flow response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    #[error("flow response was not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct RunFlowRequest<'a> {
    input_value: &'a str,
    session_id: &'a str,
    input_type: &'static str,
    output_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_component: Option<&'a str>,
}

/// Client for the Langflow run endpoint. One call per accepted query; no retries.
#[derive(Clone)]
pub struct FlowClient {
    base_url: String,
    flow_id: String,
    api_key: Option<String>,
    output_component: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl FlowClient {
    pub fn new(
        base_url: &str,
        flow_id: &str,
        api_key: Option<String>,
        output_component: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            flow_id: flow_id.to_string(),
            api_key,
            output_component,
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    /// Expected output component name, when configured.
    pub fn output_component(&self) -> Option<&str> {
        self.output_component.as_deref()
    }

    /// POST /api/v1/run/{flow_id}?stream=false — run the flow with the query as
    /// input_value and the conversation id as session_id so the flow keeps
    /// per-conversation memory. Returns the raw response document.
    pub async fn run_flow(
        &self,
        input_value: &str,
        session_id: &str,
        sender: Option<&SenderIdentity>,
    ) -> Result<serde_json::Value, FlowError> {
        let url = format!(
            "{}/api/v1/run/{}?stream=false",
            self.base_url,
            urlencoding::encode(&self.flow_id)
        );
        let body = RunFlowRequest {
            input_value,
            session_id,
            input_type: "chat",
            output_type: "chat",
            sender: sender.and_then(|s| s.handle.as_deref()),
            sender_name: sender.and_then(|s| s.name.as_deref()),
            output_component: self.output_component.as_deref(),
        };
        let mut req = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key);
        }
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(FlowError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = res.bytes().await?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(FlowError::ResponseTooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }
        serde_json::from_slice(&bytes).map_err(FlowError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_absent_fields() {
        let body = RunFlowRequest {
            input_value: "привіт",
            session_id: "-100123",
            input_type: "chat",
            output_type: "chat",
            sender: None,
            sender_name: None,
            output_component: None,
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["input_value"], "привіт");
        assert_eq!(v["session_id"], "-100123");
        assert_eq!(v["input_type"], "chat");
        assert_eq!(v["output_type"], "chat");
        assert!(v.get("sender").is_none());
        assert!(v.get("sender_name").is_none());
        assert!(v.get("output_component").is_none());
    }

    #[test]
    fn request_body_includes_sender_and_component() {
        let body = RunFlowRequest {
            input_value: "hi",
            session_id: "5",
            input_type: "chat",
            output_type: "chat",
            sender: Some("olena"),
            sender_name: Some("Олена"),
            output_component: Some("ChatOutput"),
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["sender"], "olena");
        assert_eq!(v["sender_name"], "Олена");
        assert_eq!(v["output_component"], "ChatOutput");
    }

    #[test]
    fn flow_id_is_url_encoded() {
        let client = FlowClient::new("http://flow:7860/", "my flow/1", None, None, 30);
        assert_eq!(client.base_url, "http://flow:7860");
        assert_eq!(
            urlencoding::encode(&client.flow_id),
            "my%20flow%2F1"
        );
    }
}
