use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderConfig;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status} client error: {message}")]
    Http4xx { status: u16, message: String },

    #[error("HTTP {status} server error: {message}")]
    Http5xx { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Other error: {0}")]
    Other(String),
}

impl ClientError {
    /// Stable name of the failure class, recorded alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Connection(_) => "ConnectionError",
            ClientError::Http4xx { .. } => "HttpClientError",
            ClientError::Http5xx { .. } => "HttpServerError",
            ClientError::Parse(_) => "ParseError",
            ClientError::Timeout(_) => "TimeoutError",
            ClientError::Other(_) => "RequestError",
        }
    }

    /// `"<kind>: <message>"`, the form stored in a failed probe's raw response.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

// Request types for the chat completions contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

// Only `usage` matters for timing; everything else in the body is kept raw.
#[derive(Debug, Clone, Default, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u64>,
}

/// A successful response: the reported completion token count (0 when the
/// provider omits it) and the raw body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub completion_tokens: u64,
    pub body: String,
}

impl Completion {
    pub fn from_body(body: String) -> Result<Self, ClientError> {
        let envelope: UsageEnvelope =
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))?;
        let completion_tokens = envelope
            .usage
            .and_then(|usage| usage.completion_tokens)
            .unwrap_or(0);

        Ok(Self {
            completion_tokens,
            body,
        })
    }
}

/// Configuration for creating a provider client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Idle connections kept per host (should match provider count)
    pub pool_size: usize,
    /// Upper bound on establishing a TCP/TLS connection
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client shared by every probe. Ambient proxy settings are ignored
/// so timings reflect a direct connection to each provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
}

impl ProviderClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(Duration::from_secs(300))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }

    pub fn create_request(provider: &ProviderConfig, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: provider.request_model().to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            response_format: ResponseFormat {
                kind: "text".to_string(),
            },
        }
    }

    /// Sends one non-streaming chat completion. The transport timeout is a
    /// backstop for the background request; the probe watchdog decides the
    /// recorded outcome.
    pub async fn chat_completion(
        &self,
        provider: &ProviderConfig,
        request: &ChatCompletionRequest,
        timeout: Duration,
    ) -> Result<Completion, ClientError> {
        let response = self
            .client
            .post(&provider.url)
            .bearer_auth(&provider.api_key)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());

            return Err(if (400..500).contains(&status_code) {
                ClientError::Http4xx {
                    status: status_code,
                    message: text,
                }
            } else if (500..600).contains(&status_code) {
                ClientError::Http5xx {
                    status: status_code,
                    message: text,
                }
            } else {
                ClientError::Other(format!("HTTP {}: {}", status_code, text))
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        Completion::from_body(body)
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> ClientError {
        if error.is_timeout() {
            ClientError::Timeout(timeout)
        } else if error.is_connect() {
            ClientError::Connection(error.to_string())
        } else if error.is_decode() {
            ClientError::Parse(error.to_string())
        } else if error.is_request() {
            let err_msg = error.to_string();
            if err_msg.contains("connection closed")
                || err_msg.contains("connection reset")
                || err_msg.contains("broken pipe")
                || err_msg.contains("connection refused")
            {
                ClientError::Connection(format!("Request error: {}", error))
            } else {
                ClientError::Other(format!("Request error: {}", error))
            }
        } else {
            ClientError::Other(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            key: "deepseek-r1-sil".to_string(),
            display_name: "SiliconFlow R1".to_string(),
            url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
            api_key: "sk-test".to_string(),
            model: Some("Pro/deepseek-ai/DeepSeek-R1".to_string()),
        }
    }

    #[test]
    fn test_request_shape() {
        let request = ProviderClient::create_request(&provider(), "hello");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "Pro/deepseek-ai/DeepSeek-R1",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": false,
                "response_format": {"type": "text"}
            })
        );
    }

    #[test]
    fn test_completion_tokens_extraction() {
        let body = r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"completion_tokens":42,"prompt_tokens":3}}"#;
        let completion = Completion::from_body(body.to_string()).unwrap();
        assert_eq!(completion.completion_tokens, 42);
        assert_eq!(completion.body, body);

        // Missing usage is not an error
        let completion = Completion::from_body(r#"{"choices":[]}"#.to_string()).unwrap();
        assert_eq!(completion.completion_tokens, 0);

        let completion = Completion::from_body(r#"{"usage":{}}"#.to_string()).unwrap();
        assert_eq!(completion.completion_tokens, 0);
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let err = Completion::from_body("<html>bad gateway</html>".to_string()).unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
        assert!(err.describe().starts_with("ParseError: Parse error:"));
    }

    #[test]
    fn test_error_description() {
        let err = ClientError::Http5xx {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(
            err.describe(),
            "HttpServerError: HTTP 503 server error: overloaded"
        );
    }
}
