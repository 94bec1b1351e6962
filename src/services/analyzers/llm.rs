//! LLM client abstraction (C4 support): chat-completion calls with retry,
//! exponential backoff, and `Retry-After` honoring, behind a trait so
//! analyzers can be tested against a mock.

use crate::core::config::Config;
use crate::core::error::AnalyzerError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;
const LLM_TIMEOUT_SECS: u64 = 60;

/// One chat-completion call, parameterized by system/user prompt and a
/// model id. Implementations must honor `max_tokens`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// HTTP-backed chat-completion client with the pipeline's standard
/// retry policy: 3 attempts, exponential backoff at 1s/2s/4s, honoring a
/// server-provided `Retry-After` header on HTTP 429.
pub struct HttpLlmClient {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()
            .expect("failed to build LLM HTTP client");
        Self {
            endpoint: config.llm.endpoint.clone(),
            api_key: config.llm.api_key.clone(),
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            client,
        }
    }

    async fn send(&self, system_prompt: &str, user_prompt: &str) -> std::result::Result<String, (bool, String, Option<u64>)> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| (true, e.to_string(), None))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err((true, format!("rate limited: {status}"), retry_after));
        }
        if status.is_server_error() {
            return Err((true, format!("server error: {status}"), None));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((false, format!("{status}: {body}"), None));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| (false, format!("unparseable response: {e}"), None))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| (false, "empty choices array".to_string(), None))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.send(system_prompt, user_prompt).await {
                Ok(text) => return Ok(text),
                Err((transient, message, retry_after)) => {
                    last_error = message;
                    if !transient || attempt == MAX_ATTEMPTS - 1 {
                        if transient {
                            return Err(AnalyzerError::LlmTransient(last_error).into());
                        }
                        return Err(AnalyzerError::LlmPermanent(last_error).into());
                    }
                    let backoff = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt)));
                    tracing::warn!(
                        "LLM call failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        backoff,
                        last_error
                    );
                    sleep(backoff).await;
                }
            }
        }
        Err(AnalyzerError::LlmTransient(last_error).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Client {}

        #[async_trait]
        impl LlmClient for Client {
            async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
        }
    }

    #[tokio::test]
    async fn test_mock_client_returns_configured_text() {
        let mut mock = MockClient::new();
        mock.expect_complete()
            .returning(|_, _| Ok("mocked response".to_string()));
        let result = mock.complete("system", "user").await.unwrap();
        assert_eq!(result, "mocked response");
    }
}

/// Minimal canned `LlmClient` used by the task/note analyzer unit tests,
/// kept alongside the real client so tests don't need `mockall`'s
/// expectation machinery for a fixed-response case.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::LlmClient;
    use crate::core::error::AnalyzerError;
    use crate::Result;
    use async_trait::async_trait;

    pub struct StaticLlmClient {
        response: std::result::Result<String, String>,
    }

    impl StaticLlmClient {
        pub fn returning(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
            }
        }

        pub fn failing() -> Self {
            Self {
                response: Err("simulated exhausted retries".to_string()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StaticLlmClient {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            self.response
                .clone()
                .map_err(|e| AnalyzerError::LlmTransient(e).into())
        }
    }
}
