use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AppError, Result, ServiceError};
use crate::llm::TextGenerator;

const API_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are a senior software engineer working through a software \
development lifecycle one stage at a time. Answer with the requested artifact only, in the \
exact format the instructions ask for.";

/// Anthropic Messages API client.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::Config(
                "llm.api_key is required (set SDLC_WIZARD__LLM__API_KEY)".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn send_message(
        &self,
        request: &MessagesRequest,
    ) -> std::result::Result<MessagesResponse, ServiceError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for ClaudeClient {
    async fn complete(&self, model: &str, prompt: &str) -> std::result::Result<String, ServiceError> {
        let model = if model.trim().is_empty() { self.model.as_str() } else { model };
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self.send_message(&request).await?;

        tracing::info!(
            model = %model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Generation response"
        );

        let text = extract_text(&response.content);
        if text.trim().is_empty() {
            return Err(ServiceError::MalformedResponse(format!(
                "response {} contained no text",
                response.id
            )));
        }
        Ok(text)
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(err.to_string())
    } else if err.is_builder() {
        ServiceError::Fatal(err.to_string())
    } else {
        ServiceError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    let message = format!("API returned {status}: {body}");
    match status.as_u16() {
        429 => ServiceError::QuotaExceeded(message),
        408 => ServiceError::Timeout(message),
        // 529 is the API's "overloaded" status
        500..=599 => ServiceError::Transient(message),
        _ => ServiceError::Fatal(message),
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- Request types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ServiceError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::from_u16(529).unwrap(), "overloaded"),
            ServiceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ServiceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            ServiceError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            ServiceError::Timeout(_)
        ));
    }

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "1. As a user"},
                {"type": "text", "text": "2. As an admin"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        assert_eq!(extract_text(&response.content), "1. As a user\n2. As an admin");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = ClaudeClient::new(&LlmConfig::default()).err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
