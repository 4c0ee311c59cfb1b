use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

const START_AGENT_PATH: &str = "/start-agent";
const STOP_AGENT_PATH: &str = "/stop-agent";
const WEBSOCKET_PATH: &str = "/ws";

#[derive(Debug, Clone)]
pub struct AgentServiceConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl AgentServiceConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

/// Client for the agent service that starts and stops named agents.
#[derive(Debug, Clone)]
pub struct AgentServiceClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("agent_service_base_url_missing")]
    BaseUrlMissing,
    #[error("agent_service_invalid_base_url:{0}")]
    InvalidBaseUrl(String),
    #[error("agent_id_required")]
    InvalidAgentId,
    #[error("agent_service_request_failed:{message}")]
    Request { message: String },
    #[error("agent_service_read_failed:{message}")]
    Read { message: String },
    #[error("agent_service_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("agent_service_json_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Serialize)]
struct AgentCommandRequest<'a> {
    agent_id: &'a str,
}

/// Reply to a start or stop command.
///
/// The service answers 200 for both outcomes and signals refusal with an
/// `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentCommandResponse {
    Accepted { message: String, agent_id: String },
    Rejected { error: String },
}

impl AgentCommandResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl AgentServiceClient {
    pub fn new(config: AgentServiceConfig) -> Result<Self, AgentClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let trimmed = path.trim();
        if trimmed.starts_with('/') {
            format!("{}{}", self.base_url, trimmed)
        } else {
            format!("{}/{}", self.base_url, trimmed)
        }
    }

    /// WebSocket URL of the agent's echo channel.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}{WEBSOCKET_PATH}")
    }

    pub async fn start_agent(
        &self,
        agent_id: &str,
    ) -> Result<AgentCommandResponse, AgentClientError> {
        self.send_command(START_AGENT_PATH, agent_id).await
    }

    pub async fn stop_agent(
        &self,
        agent_id: &str,
    ) -> Result<AgentCommandResponse, AgentClientError> {
        self.send_command(STOP_AGENT_PATH, agent_id).await
    }

    // The service reads `agent_id` from the query string; the JSON body is
    // sent as well for services that read it from there.
    async fn send_command(
        &self,
        path: &str,
        agent_id: &str,
    ) -> Result<AgentCommandResponse, AgentClientError> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(AgentClientError::InvalidAgentId);
        }

        let url = self.endpoint(path);
        let payload = AgentCommandRequest { agent_id };
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .post(url.as_str())
                .query(&[("agent_id", agent_id)])
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout)
                .json(&payload);

            match request.send().await {
                Ok(response) => {
                    debug!(path, agent_id, status = %response.status(), "agent service replied");
                    return decode_json_response(response).await;
                }
                Err(error) => {
                    warn!(path, attempt, reason = %error, "agent service request failed");
                    let retryable = error.is_connect();
                    last_error = Some(error.to_string());
                    // Commands are not idempotent: only resend when the request never
                    // reached the service.
                    if !retryable || attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(AgentClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> AgentClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    AgentClientError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, AgentClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(AgentClientError::BaseUrlMissing);
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(AgentClientError::InvalidBaseUrl(trimmed.to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, AgentClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| AgentClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| AgentClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> Result<AgentServiceClient, AgentClientError> {
        AgentServiceClient::new(AgentServiceConfig::new(base_url))
    }

    #[test]
    fn endpoint_builder_normalizes_paths() -> Result<(), AgentClientError> {
        let client = client("http://localhost:8000/")?;
        assert_eq!(
            client.endpoint("/start-agent"),
            "http://localhost:8000/start-agent"
        );
        assert_eq!(
            client.endpoint("stop-agent"),
            "http://localhost:8000/stop-agent"
        );
        Ok(())
    }

    #[test]
    fn websocket_url_follows_scheme() -> Result<(), AgentClientError> {
        assert_eq!(
            client("http://localhost:8000")?.websocket_url(),
            "ws://localhost:8000/ws"
        );
        assert_eq!(
            client("https://agents.example.com/")?.websocket_url(),
            "wss://agents.example.com/ws"
        );
        Ok(())
    }

    #[test]
    fn base_url_must_be_present_and_http() {
        assert!(matches!(
            client("   "),
            Err(AgentClientError::BaseUrlMissing)
        ));
        assert!(matches!(
            client("ftp://agents"),
            Err(AgentClientError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::BAD_GATEWAY, b" agent crashed ");
        assert_eq!(
            error.to_string(),
            "agent_service_http_502 Bad Gateway:agent crashed"
        );

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            empty_body.to_string(),
            "agent_service_http_503 Service Unavailable:<empty>"
        );
    }

    #[test]
    fn command_replies_decode_both_shapes() -> Result<(), serde_json::Error> {
        let accepted: AgentCommandResponse = serde_json::from_str(
            r#"{"message":"Agent started","agent_id":"alpha"}"#,
        )?;
        assert!(accepted.is_accepted());

        let rejected: AgentCommandResponse =
            serde_json::from_str(r#"{"error":"Agent already running"}"#)?;
        assert_eq!(
            rejected,
            AgentCommandResponse::Rejected {
                error: "Agent already running".to_string()
            }
        );
        Ok(())
    }
}
