use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;

use crate::providers::types::{ApiType, ChatMessage, ChatRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Snippet,
    Assistant,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Snippet => "snippet",
            UnitKind::Assistant => "assistant",
        }
    }
}

/// One loaded prompt folder: the system prompt text plus its merged
/// settings. Read-only once scanned; a reload swaps whole tables.
#[derive(Debug, Clone)]
pub struct PromptUnit {
    pub name: String,
    pub kind: UnitKind,
    pub path: PathBuf,
    pub prompt: String,
    /// Context fragments, already resolved to text at load time.
    pub contexts: Vec<String>,
    /// Model alias (or literal model name) handed to the provider router.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub force_api: Option<ApiType>,
    pub tools: Vec<String>,
}

impl PromptUnit {
    /// Final system prompt: the folder's prompt, then a context block with
    /// the registered fragments and the current date.
    pub fn build_prompt(&self) -> String {
        let mut prompt = self.prompt.clone();
        prompt.push_str(
            "\nTake into consideration the context below while generating answers.\n# Context:",
        );
        let date_line = format!("Current date: {}", Utc::now().format("%Y-%m-%d"));
        for (idx, context) in self
            .contexts
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(date_line.as_str()))
            .enumerate()
        {
            prompt.push_str(&format!("\n## {idx}\n{context}"));
        }
        prompt
    }

    /// Assemble the provider request for this unit with a resolved model
    /// name and the transcript to send.
    pub fn chat_request(&self, model: String, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model,
            system_prompt: Some(self.build_prompt()),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Shape of a unit folder's optional `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitConfigFile {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub force_api: Option<String>,
    pub tools: Option<Vec<String>>,
    pub contexts: Vec<ContextFragment>,
}

/// A context fragment is either inline text or a file read relative to
/// the unit folder.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContextFragment {
    Text { text: String },
    File { file: PathBuf },
}
