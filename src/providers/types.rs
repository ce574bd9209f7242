use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::models::MessageKind;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no credentials configured for {0}")]
    MissingCredentials(ApiType),

    #[error("no backend built in for {0}")]
    Unsupported(ApiType),

    #[error("no provider is available")]
    NoneAvailable,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The provider API families the catalog knows about. Credentials are
/// checked for all of them; only a subset has a built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiType {
    Azure,
    OpenAi,
    Anthropic,
    Bedrock,
    Google,
    Ollama,
}

/// Fallback order when neither the unit nor the config names an API.
pub const API_PREFERENCE: [ApiType; 6] = [
    ApiType::Azure,
    ApiType::OpenAi,
    ApiType::Anthropic,
    ApiType::Bedrock,
    ApiType::Ollama,
    ApiType::Google,
];

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Azure => "azure",
            ApiType::OpenAi => "openai",
            ApiType::Anthropic => "anthropic",
            ApiType::Bedrock => "bedrock",
            ApiType::Google => "google",
            ApiType::Ollama => "ollama",
        }
    }

    /// Environment keys that must all be present for the API to count as
    /// credentialed.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            ApiType::Azure => &[
                "AZURE_OPENAI_API_KEY",
                "AZURE_OPENAI_ENDPOINT",
                "OPENAI_API_VERSION",
            ],
            ApiType::OpenAi => &["OPENAI_API_KEY"],
            ApiType::Anthropic => &["ANTHROPIC_API_KEY"],
            ApiType::Bedrock => &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"],
            ApiType::Google => &["GOOGLE_API_KEY"],
            ApiType::Ollama => &["OLLAMA_ENDPOINT"],
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "azure" => Ok(ApiType::Azure),
            "openai" => Ok(ApiType::OpenAi),
            "anthropic" => Ok(ApiType::Anthropic),
            "bedrock" | "aws" => Ok(ApiType::Bedrock),
            "google" | "gemini" => Ok(ApiType::Google),
            "ollama" => Ok(ApiType::Ollama),
            other => Err(format!("unknown api type: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub kind: MessageKind,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}
