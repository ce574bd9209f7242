use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::MessageKind;
use crate::providers::traits::Completion;
use crate::providers::types::{ChatRequest, ProviderError};

/// Plain HTTP client for the OpenAI chat-completions wire shape. Works
/// against api.openai.com as well as Ollama and other compatible servers;
/// the key is optional because local endpoints do not need one.
pub struct OpenAiCompatClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn translate_kind(kind: MessageKind) -> &'static str {
        match kind {
            MessageKind::System => "system",
            MessageKind::Human => "user",
            MessageKind::Assistant => "assistant",
        }
    }

    fn build_body(request: &ChatRequest) -> WireRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(prompt) = request.system_prompt.as_deref() {
            if !prompt.is_empty() {
                messages.push(WireMessage {
                    role: "system".to_string(),
                    content: prompt.to_string(),
                });
            }
        }
        for msg in &request.messages {
            messages.push(WireMessage {
                role: Self::translate_kind(msg.kind).to_string(),
                content: msg.content.clone(),
            });
        }
        WireRequest {
            model: request.model.clone(),
            messages,
            stream: false,
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
        }
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<WireErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: request failed", status.as_u16())
    }

    fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }
}

#[async_trait]
impl Completion for OpenAiCompatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
        let body = Self::build_body(&request);

        let mut req = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::Auth("invalid API key".to_string()));
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Self::retry_after_secs(&response),
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response had no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}
