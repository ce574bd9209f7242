use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::warn;

use crate::models::{Message, MessageKind};
use crate::providers::{ChatMessage, ChatRequest, ProviderError, ProviderRouter};
use crate::services::database::{Database, StoreError};
use crate::units::{PromptUnit, UnitRegistry};

// Used when a conversation has no assistant; mirrors the assistant
// folder defaults.
const FALLBACK_MODEL_ALIAS: &str = "B";
const FALLBACK_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unknown snippet: {0}")]
    UnknownSnippet(String),

    #[error("unknown assistant: {0}")]
    UnknownAssistant(String),

    #[error("cannot read {path}: {source}")]
    InputFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChatError {
    /// Reply shape for failed runs: `FAIL: <category>: <detail>`.
    pub fn failure_line(&self) -> String {
        format!("FAIL: {}: {self}", self.category())
    }

    fn category(&self) -> &'static str {
        match self {
            ChatError::UnknownSnippet(_) | ChatError::UnknownAssistant(_) => "UnknownUnit",
            ChatError::InputFile { .. } => "IoError",
            ChatError::Store(_) => "StoreError",
            ChatError::Provider(e) => match e {
                ProviderError::MissingCredentials(_) => "MissingCredentials",
                ProviderError::Unsupported(_) => "UnsupportedApi",
                ProviderError::NoneAvailable => "NoProvider",
                ProviderError::Auth(_) => "AuthError",
                ProviderError::RateLimited { .. } => "RateLimited",
                ProviderError::RequestFailed(_) => "RequestFailed",
                ProviderError::Network(_) => "NetworkError",
                ProviderError::InvalidResponse(_) => "InvalidResponse",
            },
        }
    }
}

/// Convert stored transcript rows into provider messages.
pub fn transcript_to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage {
            kind: m.kind,
            content: m.content.clone(),
        })
        .collect()
}

/// One-shot snippet run: the unit's prompt becomes the system prompt and
/// the input is the single user message.
pub async fn run_snippet(
    router: &ProviderRouter,
    unit: &PromptUnit,
    input: &str,
) -> Result<String, ChatError> {
    let (backend, model) = router.resolve(unit.force_api, &unit.model)?;
    let request = unit.chat_request(
        model,
        vec![ChatMessage {
            kind: MessageKind::Human,
            content: input.to_string(),
        }],
    );
    Ok(backend.complete(request).await?)
}

/// Transcript-backed chat: the user line and the assistant's reply both
/// land in the conversation record. A failed completion is recorded in
/// the transcript as a `FAIL: ...` assistant entry and returned to the
/// caller as the error.
#[derive(Clone)]
pub struct ChatService {
    db: Database,
    router: Arc<ProviderRouter>,
    registry: Arc<RwLock<UnitRegistry>>,
    default_assistant: Option<String>,
}

impl ChatService {
    pub fn new(
        db: Database,
        router: Arc<ProviderRouter>,
        registry: Arc<RwLock<UnitRegistry>>,
        default_assistant: Option<String>,
    ) -> Self {
        Self {
            db,
            router,
            registry,
            default_assistant,
        }
    }

    pub async fn send(&self, conversation_id: i64, text: &str) -> Result<Message, ChatError> {
        let conversation = self.db.get_conversation(conversation_id).await?;
        self.db
            .append_message(conversation_id, MessageKind::Human, text)
            .await?;
        let history = self.db.list_messages(conversation_id).await?;

        match self
            .complete_turn(conversation.assistant.as_deref(), &history)
            .await
        {
            Ok(content) => Ok(self
                .db
                .append_message(conversation_id, MessageKind::Assistant, &content)
                .await?),
            Err(e) => {
                warn!(conversation_id, error = %e, "chat turn failed");
                self.db
                    .append_message(conversation_id, MessageKind::Assistant, &e.failure_line())
                    .await?;
                Err(e)
            }
        }
    }

    async fn complete_turn(
        &self,
        assistant: Option<&str>,
        history: &[Message],
    ) -> Result<String, ChatError> {
        let messages = transcript_to_chat_messages(history);
        match self.resolve_assistant(assistant)? {
            Some(unit) => {
                let (backend, model) = self.router.resolve(unit.force_api, &unit.model)?;
                let request = unit.chat_request(model, messages);
                Ok(backend.complete(request).await?)
            }
            None => {
                let (backend, model) = self.router.resolve(None, FALLBACK_MODEL_ALIAS)?;
                let request = ChatRequest {
                    model,
                    system_prompt: None,
                    messages,
                    temperature: FALLBACK_TEMPERATURE,
                    max_tokens: None,
                };
                Ok(backend.complete(request).await?)
            }
        }
    }

    /// The conversation's assistant wins over the configured default; a
    /// name that no longer resolves after a reload is an error.
    fn resolve_assistant(&self, name: Option<&str>) -> Result<Option<Arc<PromptUnit>>, ChatError> {
        let Some(name) = name.or(self.default_assistant.as_deref()) else {
            return Ok(None);
        };
        let registry = self.registry.read().unwrap();
        match registry.get_assistant(name) {
            Some(unit) => Ok(Some(unit)),
            None => Err(ChatError::UnknownAssistant(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::providers::{ApiType, Completion};
    use crate::units::{ScanRoot, UnitKind};

    struct FixedReply(&'static str);

    #[async_trait]
    impl Completion for FixedReply {
        async fn complete(&self, _request: ChatRequest) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Completion for AlwaysFails {
        async fn complete(&self, _request: ChatRequest) -> Result<String, ProviderError> {
            Err(ProviderError::Network("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl Completion for Capture {
        async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
            *self.seen.lock().unwrap() = Some(request);
            Ok("ok".to_string())
        }
    }

    fn registry_with_assistant(name: &str) -> (TempDir, Arc<RwLock<UnitRegistry>>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("assistants");
        std::fs::create_dir_all(root.join(name)).unwrap();
        std::fs::write(root.join(name).join("prompt.md"), "You are terse.").unwrap();
        let registry = UnitRegistry::scan(&[ScanRoot {
            path: root,
            kind: UnitKind::Assistant,
        }]);
        (dir, Arc::new(RwLock::new(registry)))
    }

    fn empty_registry() -> Arc<RwLock<UnitRegistry>> {
        Arc::new(RwLock::new(UnitRegistry::default()))
    }

    async fn conversation_with_assistant(db: &Database, assistant: Option<&str>) -> i64 {
        db.create_conversation(Some("chat".to_string()), None, assistant.map(String::from))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn send_appends_user_message_and_reply() {
        let db = Database::new_in_memory().unwrap();
        let (_dir, registry) = registry_with_assistant("sage");
        let router = Arc::new(ProviderRouter::with_backend(
            ApiType::OpenAi,
            Arc::new(FixedReply("pong")),
        ));
        let service = ChatService::new(db.clone(), router, registry, None);

        let id = conversation_with_assistant(&db, Some("sage")).await;
        let reply = service.send(id, "ping").await.unwrap();
        assert_eq!(reply.kind, MessageKind::Assistant);
        assert_eq!(reply.content, "pong");

        let transcript = db.list_messages(id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].kind, MessageKind::Human);
        assert_eq!(transcript[0].content, "ping");
        assert_eq!(transcript[1].content, "pong");
    }

    #[tokio::test]
    async fn failed_completion_is_recorded_in_the_transcript() {
        let db = Database::new_in_memory().unwrap();
        let (_dir, registry) = registry_with_assistant("sage");
        let router = Arc::new(ProviderRouter::with_backend(
            ApiType::OpenAi,
            Arc::new(AlwaysFails),
        ));
        let service = ChatService::new(db.clone(), router, registry, None);

        let id = conversation_with_assistant(&db, Some("sage")).await;
        let err = service.send(id, "ping").await.unwrap_err();
        assert!(matches!(err, ChatError::Provider(ProviderError::Network(_))));

        let transcript = db.list_messages(id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].kind, MessageKind::Assistant);
        assert!(transcript[1]
            .content
            .starts_with("FAIL: NetworkError: connection refused"));
    }

    #[tokio::test]
    async fn unknown_assistant_is_recorded_and_returned() {
        let db = Database::new_in_memory().unwrap();
        let router = Arc::new(ProviderRouter::with_backend(
            ApiType::OpenAi,
            Arc::new(FixedReply("never sent")),
        ));
        let service = ChatService::new(db.clone(), router, empty_registry(), None);

        let id = conversation_with_assistant(&db, Some("ghost")).await;
        let err = service.send(id, "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::UnknownAssistant(ref name) if name == "ghost"));

        let transcript = db.list_messages(id).await.unwrap();
        assert!(transcript[1].content.starts_with("FAIL: UnknownUnit:"));
    }

    #[tokio::test]
    async fn assistant_prompt_and_history_reach_the_backend() {
        let db = Database::new_in_memory().unwrap();
        let (_dir, registry) = registry_with_assistant("sage");
        let capture = Arc::new(Capture::default());
        let router = Arc::new(ProviderRouter::with_backend(ApiType::OpenAi, capture.clone()));
        let service = ChatService::new(db.clone(), router, registry, Some("sage".to_string()));

        // No per-conversation assistant: the default one applies.
        let id = conversation_with_assistant(&db, None).await;
        service.send(id, "first").await.unwrap();
        service.send(id, "second").await.unwrap();

        let request = capture.seen.lock().unwrap().take().unwrap();
        assert!(request
            .system_prompt
            .as_deref()
            .unwrap()
            .starts_with("You are terse."));
        // Full history: human, assistant, human.
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].content, "second");
    }

    #[tokio::test]
    async fn no_assistant_falls_back_to_bare_request() {
        let db = Database::new_in_memory().unwrap();
        let capture = Arc::new(Capture::default());
        let router = Arc::new(ProviderRouter::with_backend(ApiType::OpenAi, capture.clone()));
        let service = ChatService::new(db.clone(), router, empty_registry(), None);

        let id = conversation_with_assistant(&db, None).await;
        service.send(id, "hello").await.unwrap();

        let request = capture.seen.lock().unwrap().take().unwrap();
        assert!(request.system_prompt.is_none());
        assert_eq!(request.model, "gpt-4o");
    }

    #[tokio::test]
    async fn run_snippet_sends_input_as_single_user_message() {
        let (_dir, registry) = registry_with_assistant("summary");
        let unit = registry.read().unwrap().get_assistant("summary").unwrap();
        let capture = Arc::new(Capture::default());
        let router = ProviderRouter::with_backend(ApiType::OpenAi, capture.clone());

        let reply = run_snippet(&router, &unit, "condense this").await.unwrap();
        assert_eq!(reply, "ok");

        let request = capture.seen.lock().unwrap().take().unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].kind, MessageKind::Human);
        assert_eq!(request.messages[0].content, "condense this");
        assert!(request
            .system_prompt
            .as_deref()
            .unwrap()
            .contains("Current date:"));
    }
}
