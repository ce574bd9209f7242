use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::ipc::protocol::{Request, Response};
use crate::models::{Conversation, Message};
use crate::providers::ProviderRouter;
use crate::services::chat::{self, ChatError};
use crate::services::database::{Database, ListFilter, StoreError};
use crate::units::{ScanRoot, UnitRegistry};

/// Events the host surfaces to an embedding UI. The headless host
/// drains and logs them.
#[derive(Debug)]
pub enum UiEvent {
    WindowShown,
    WindowHidden,
    ChatListReloaded(Vec<Conversation>),
    ChatSelected {
        conversation: Conversation,
        transcript: Vec<Message>,
    },
    SnippetsReloaded {
        snippets: Vec<String>,
        assistants: Vec<String>,
    },
    SnippetFinished {
        job_id: Uuid,
        snippet: String,
        ok: bool,
    },
}

/// A finished snippet run, posted by its worker task back to the host
/// loop, which fulfils the waiting reply.
#[derive(Debug)]
pub struct WorkerDone {
    pub job_id: Uuid,
    pub snippet: String,
    pub result: Result<String, ChatError>,
    pub reply_tx: oneshot::Sender<Response>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Ready(Response),
    /// The reply arrives once the host loop processes the worker result.
    Pending(oneshot::Receiver<Response>),
}

/// Everything the command handlers operate on. Built once at startup;
/// no global instance.
pub struct AppContext {
    pub db: Database,
    pub registry: Arc<RwLock<UnitRegistry>>,
    pub router: Arc<ProviderRouter>,
    pub config: AppConfig,
    pub scan_roots: Vec<ScanRoot>,
    window_visible: AtomicBool,
    current_chat: Mutex<Option<i64>>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerDone>,
}

/// Receiving ends of the host queues, held by the event loop.
pub struct AppChannels {
    pub ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    pub worker_rx: mpsc::UnboundedReceiver<WorkerDone>,
}

impl AppContext {
    pub fn new(
        db: Database,
        registry: UnitRegistry,
        router: Arc<ProviderRouter>,
        config: AppConfig,
        scan_roots: Vec<ScanRoot>,
    ) -> (Arc<Self>, AppChannels) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            db,
            registry: Arc::new(RwLock::new(registry)),
            router,
            config,
            scan_roots,
            window_visible: AtomicBool::new(false),
            current_chat: Mutex::new(None),
            ui_tx,
            worker_tx,
        });
        (ctx, AppChannels { ui_rx, worker_rx })
    }

    pub fn window_visible(&self) -> bool {
        self.window_visible.load(Ordering::Relaxed)
    }

    pub fn current_chat(&self) -> Option<i64> {
        *self.current_chat.lock().unwrap()
    }

    fn emit(&self, event: UiEvent) {
        // The receiver only goes away on shutdown.
        let _ = self.ui_tx.send(event);
    }

    fn list_filter(&self) -> ListFilter {
        ListFilter {
            limit: self.config.chat.visible_last_chats,
            ..ListFilter::default()
        }
    }
}

/// Route one decoded command to its handler. Handler failures become
/// error replies; a bad command never takes the host down.
pub async fn dispatch(ctx: &Arc<AppContext>, request: Request) -> DispatchOutcome {
    match request {
        Request::ShowApp => {
            ctx.window_visible.store(true, Ordering::Relaxed);
            ctx.emit(UiEvent::WindowShown);
            DispatchOutcome::Ready(Response::Ack)
        }
        Request::HideApp => {
            ctx.window_visible.store(false, Ordering::Relaxed);
            ctx.emit(UiEvent::WindowHidden);
            DispatchOutcome::Ready(Response::Ack)
        }
        Request::GetListOfSnippets => {
            let names = ctx.registry.read().unwrap().snippet_names();
            DispatchOutcome::Ready(Response::Snippets { names })
        }
        Request::RunSnippet { name, input } => run_snippet_job(ctx, name, input),
        Request::RunSnippetWithFile { name, path } => {
            let path = PathBuf::from(path);
            match tokio::fs::read_to_string(&path).await {
                Ok(input) => run_snippet_job(ctx, name, input),
                Err(source) => error_reply(ChatError::InputFile { path, source }),
            }
        }
        Request::ReloadChatList => match ctx.db.list_conversations(ctx.list_filter()).await {
            Ok(conversations) => {
                ctx.emit(UiEvent::ChatListReloaded(conversations));
                DispatchOutcome::Ready(Response::Ack)
            }
            Err(e) => error_reply(e),
        },
        Request::SelectChat { conversation_id } => match select_chat(ctx, conversation_id).await {
            Ok(()) => DispatchOutcome::Ready(Response::Ack),
            Err(e) => error_reply(e),
        },
        Request::DelChat {
            conversation_id,
            soft,
        } => match del_chat(ctx, conversation_id, soft).await {
            Ok(()) => DispatchOutcome::Ready(Response::Ack),
            Err(e) => error_reply(e),
        },
        Request::ReloadSnippets => {
            let registry = UnitRegistry::scan(&ctx.scan_roots);
            let snippets = registry.snippet_names();
            let assistants = registry.assistant_names();
            *ctx.registry.write().unwrap() = registry;
            info!(
                snippets = snippets.len(),
                assistants = assistants.len(),
                "prompt units reloaded"
            );
            ctx.emit(UiEvent::SnippetsReloaded {
                snippets,
                assistants,
            });
            DispatchOutcome::Ready(Response::Ack)
        }
    }
}

/// Fulfil a finished worker's waiting reply and surface the outcome.
pub fn finish_snippet(ctx: &AppContext, done: WorkerDone) {
    let WorkerDone {
        job_id,
        snippet,
        result,
        reply_tx,
    } = done;
    let response = match &result {
        Ok(text) => {
            info!(job = %job_id, snippet = %snippet, "snippet finished");
            Response::Text { text: text.clone() }
        }
        Err(e) => {
            warn!(job = %job_id, snippet = %snippet, error = %e, "snippet failed");
            Response::Error {
                message: e.failure_line(),
            }
        }
    };
    ctx.emit(UiEvent::SnippetFinished {
        job_id,
        snippet,
        ok: result.is_ok(),
    });
    // The requester may have timed out and gone.
    let _ = reply_tx.send(response);
}

fn error_reply(e: impl Into<ChatError>) -> DispatchOutcome {
    DispatchOutcome::Ready(Response::Error {
        message: e.into().failure_line(),
    })
}

fn run_snippet_job(ctx: &Arc<AppContext>, name: String, input: String) -> DispatchOutcome {
    let unit = ctx.registry.read().unwrap().get_snippet(&name);
    let Some(unit) = unit else {
        return error_reply(ChatError::UnknownSnippet(name));
    };

    let job_id = Uuid::new_v4();
    let (reply_tx, reply_rx) = oneshot::channel();
    let router = ctx.router.clone();
    let worker_tx = ctx.worker_tx.clone();
    info!(job = %job_id, snippet = %name, bytes = input.len(), "snippet started");
    tokio::spawn(async move {
        let result = chat::run_snippet(&router, &unit, &input).await;
        let done = WorkerDone {
            job_id,
            snippet: name,
            result,
            reply_tx,
        };
        if worker_tx.send(done).is_err() {
            warn!(job = %job_id, "host loop gone, dropping snippet result");
        }
    });
    DispatchOutcome::Pending(reply_rx)
}

async fn select_chat(ctx: &AppContext, conversation_id: i64) -> Result<(), StoreError> {
    let conversation = ctx.db.get_conversation(conversation_id).await?;
    let transcript = ctx.db.list_messages(conversation_id).await?;
    *ctx.current_chat.lock().unwrap() = Some(conversation_id);
    info!(conversation_id, messages = transcript.len(), "chat selected");
    ctx.emit(UiEvent::ChatSelected {
        conversation,
        transcript,
    });
    Ok(())
}

async fn del_chat(ctx: &AppContext, conversation_id: i64, soft: bool) -> Result<(), StoreError> {
    ctx.db.delete_conversation(conversation_id, !soft).await?;
    {
        let mut current = ctx.current_chat.lock().unwrap();
        if *current == Some(conversation_id) {
            *current = None;
        }
    }
    let conversations = ctx.db.list_conversations(ctx.list_filter()).await?;
    ctx.emit(UiEvent::ChatListReloaded(conversations));
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::models::MessageKind;
    use crate::providers::{ApiType, ChatRequest, Completion, ProviderError};
    use crate::units::UnitKind;

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

    struct EchoInput;

    #[async_trait]
    impl Completion for EchoInput {
        async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
            Ok(request.messages[0].content.clone())
        }
    }

    fn snippet_root(names: &[&str]) -> (TempDir, Vec<ScanRoot>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("snippets");
        for name in names {
            std::fs::create_dir_all(root.join(name)).unwrap();
            std::fs::write(root.join(name).join("prompt.md"), "Do the thing.").unwrap();
        }
        let roots = vec![ScanRoot {
            path: root,
            kind: UnitKind::Snippet,
        }];
        (dir, roots)
    }

    fn test_context(
        backend: Arc<dyn Completion>,
        roots: Vec<ScanRoot>,
    ) -> (Arc<AppContext>, AppChannels) {
        let db = Database::new_in_memory().unwrap();
        let registry = UnitRegistry::scan(&roots);
        let router = Arc::new(ProviderRouter::with_backend(ApiType::OpenAi, backend));
        AppContext::new(db, registry, router, AppConfig::default(), roots)
    }

    async fn pending_reply(
        ctx: &Arc<AppContext>,
        channels: &mut AppChannels,
        outcome: DispatchOutcome,
    ) -> Response {
        let DispatchOutcome::Pending(rx) = outcome else {
            panic!("expected a pending outcome");
        };
        let done = channels.worker_rx.recv().await.unwrap();
        finish_snippet(ctx, done);
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn show_and_hide_toggle_visibility_and_emit_events() {
        let (ctx, mut channels) = test_context(Arc::new(FixedReply("x")), Vec::new());

        assert!(!ctx.window_visible());
        let outcome = dispatch(&ctx, Request::ShowApp).await;
        assert!(matches!(outcome, DispatchOutcome::Ready(Response::Ack)));
        assert!(ctx.window_visible());
        assert!(matches!(
            channels.ui_rx.recv().await.unwrap(),
            UiEvent::WindowShown
        ));

        dispatch(&ctx, Request::HideApp).await;
        assert!(!ctx.window_visible());
        assert!(matches!(
            channels.ui_rx.recv().await.unwrap(),
            UiEvent::WindowHidden
        ));
    }

    #[tokio::test]
    async fn snippet_listing_is_sorted() {
        let (_dir, roots) = snippet_root(&["zeta", "alpha"]);
        let (ctx, _channels) = test_context(Arc::new(FixedReply("x")), roots);

        let outcome = dispatch(&ctx, Request::GetListOfSnippets).await;
        let DispatchOutcome::Ready(Response::Snippets { names }) = outcome else {
            panic!("expected a snippet listing");
        };
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn unknown_snippet_is_an_error_reply_and_host_keeps_serving() {
        let (ctx, _channels) = test_context(Arc::new(FixedReply("x")), Vec::new());

        let outcome = dispatch(
            &ctx,
            Request::RunSnippet {
                name: "ghost".to_string(),
                input: "hi".to_string(),
            },
        )
        .await;
        let DispatchOutcome::Ready(Response::Error { message }) = outcome else {
            panic!("expected an error reply");
        };
        assert!(message.starts_with("FAIL: UnknownUnit: unknown snippet: ghost"));

        // Later commands still answer.
        let outcome = dispatch(&ctx, Request::GetListOfSnippets).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Ready(Response::Snippets { .. })
        ));
    }

    #[tokio::test]
    async fn run_snippet_round_trips_through_the_worker_queue() {
        let (_dir, roots) = snippet_root(&["fix"]);
        let (ctx, mut channels) = test_context(Arc::new(FixedReply("done")), roots);

        let outcome = dispatch(
            &ctx,
            Request::RunSnippet {
                name: "fix".to_string(),
                input: "broken text".to_string(),
            },
        )
        .await;
        let reply = pending_reply(&ctx, &mut channels, outcome).await;
        assert_eq!(
            reply,
            Response::Text {
                text: "done".to_string()
            }
        );

        let event = channels.ui_rx.recv().await.unwrap();
        let UiEvent::SnippetFinished { snippet, ok, .. } = event else {
            panic!("expected a snippet event, got {event:?}");
        };
        assert_eq!(snippet, "fix");
        assert!(ok);
    }

    #[tokio::test]
    async fn failed_snippet_replies_with_a_fail_line() {
        let (_dir, roots) = snippet_root(&["fix"]);
        let (ctx, mut channels) = test_context(Arc::new(AlwaysFails), roots);

        let outcome = dispatch(
            &ctx,
            Request::RunSnippet {
                name: "fix".to_string(),
                input: "x".to_string(),
            },
        )
        .await;
        let reply = pending_reply(&ctx, &mut channels, outcome).await;
        let Response::Error { message } = reply else {
            panic!("expected an error reply");
        };
        assert!(message.starts_with("FAIL: NetworkError: connection refused"));
    }

    #[tokio::test]
    async fn run_snippet_with_file_reads_the_host_file() {
        let (_dir, roots) = snippet_root(&["fix"]);
        let (ctx, mut channels) = test_context(Arc::new(EchoInput), roots);

        let input = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(input.path(), "file contents").unwrap();

        let outcome = dispatch(
            &ctx,
            Request::RunSnippetWithFile {
                name: "fix".to_string(),
                path: input.path().to_string_lossy().into_owned(),
            },
        )
        .await;
        let reply = pending_reply(&ctx, &mut channels, outcome).await;
        assert_eq!(
            reply,
            Response::Text {
                text: "file contents".to_string()
            }
        );
    }

    #[tokio::test]
    async fn run_snippet_with_missing_file_is_an_error_reply() {
        let (_dir, roots) = snippet_root(&["fix"]);
        let (ctx, _channels) = test_context(Arc::new(FixedReply("x")), roots);

        let outcome = dispatch(
            &ctx,
            Request::RunSnippetWithFile {
                name: "fix".to_string(),
                path: "/nonexistent/input.txt".to_string(),
            },
        )
        .await;
        let DispatchOutcome::Ready(Response::Error { message }) = outcome else {
            panic!("expected an error reply");
        };
        assert!(message.starts_with("FAIL: IoError:"));
    }

    #[tokio::test]
    async fn select_chat_records_selection_and_emits_transcript() {
        let (ctx, mut channels) = test_context(Arc::new(FixedReply("x")), Vec::new());
        let conv = ctx
            .db
            .create_conversation(Some("notes".to_string()), None, None)
            .await
            .unwrap();
        ctx.db
            .append_message(conv.id, MessageKind::Human, "hello")
            .await
            .unwrap();

        let outcome = dispatch(
            &ctx,
            Request::SelectChat {
                conversation_id: conv.id,
            },
        )
        .await;
        assert!(matches!(outcome, DispatchOutcome::Ready(Response::Ack)));
        assert_eq!(ctx.current_chat(), Some(conv.id));

        let event = channels.ui_rx.recv().await.unwrap();
        let UiEvent::ChatSelected {
            conversation,
            transcript,
        } = event
        else {
            panic!("expected a selection event, got {event:?}");
        };
        assert_eq!(conversation.id, conv.id);
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn select_chat_on_missing_id_is_an_error_reply() {
        let (ctx, _channels) = test_context(Arc::new(FixedReply("x")), Vec::new());
        let outcome = dispatch(&ctx, Request::SelectChat { conversation_id: 42 }).await;
        let DispatchOutcome::Ready(Response::Error { message }) = outcome else {
            panic!("expected an error reply");
        };
        assert!(message.starts_with("FAIL: StoreError: conversation 42 not found"));
    }

    #[tokio::test]
    async fn del_chat_clears_selection_and_reposts_the_list() {
        let (ctx, mut channels) = test_context(Arc::new(FixedReply("x")), Vec::new());
        let doomed = ctx
            .db
            .create_conversation(Some("doomed".to_string()), None, None)
            .await
            .unwrap();
        let kept = ctx
            .db
            .create_conversation(Some("kept".to_string()), None, None)
            .await
            .unwrap();

        dispatch(
            &ctx,
            Request::SelectChat {
                conversation_id: doomed.id,
            },
        )
        .await;
        let _ = channels.ui_rx.recv().await;

        let outcome = dispatch(
            &ctx,
            Request::DelChat {
                conversation_id: doomed.id,
                soft: false,
            },
        )
        .await;
        assert!(matches!(outcome, DispatchOutcome::Ready(Response::Ack)));
        assert_eq!(ctx.current_chat(), None);

        let event = channels.ui_rx.recv().await.unwrap();
        let UiEvent::ChatListReloaded(conversations) = event else {
            panic!("expected a list event, got {event:?}");
        };
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, kept.id);

        assert!(ctx.db.get_conversation(doomed.id).await.is_err());
    }

    #[tokio::test]
    async fn soft_del_chat_hides_instead_of_removing() {
        let (ctx, _channels) = test_context(Arc::new(FixedReply("x")), Vec::new());
        let conv = ctx
            .db
            .create_conversation(Some("soft".to_string()), None, None)
            .await
            .unwrap();

        dispatch(
            &ctx,
            Request::DelChat {
                conversation_id: conv.id,
                soft: true,
            },
        )
        .await;

        let kept = ctx.db.get_conversation(conv.id).await.unwrap();
        assert!(!kept.visible);
    }

    #[tokio::test]
    async fn reload_snippets_picks_up_new_folders_without_restart() {
        let (dir, roots) = snippet_root(&["first"]);
        let (ctx, mut channels) = test_context(Arc::new(FixedReply("x")), roots);

        let root = dir.path().join("snippets");
        std::fs::create_dir_all(root.join("second")).unwrap();
        std::fs::write(root.join("second").join("prompt.md"), "New unit.").unwrap();

        let outcome = dispatch(&ctx, Request::ReloadSnippets).await;
        assert!(matches!(outcome, DispatchOutcome::Ready(Response::Ack)));

        let event = channels.ui_rx.recv().await.unwrap();
        let UiEvent::SnippetsReloaded { snippets, .. } = event else {
            panic!("expected a reload event, got {event:?}");
        };
        assert_eq!(
            snippets,
            vec!["first".to_string(), "second".to_string()]
        );

        let outcome = dispatch(&ctx, Request::GetListOfSnippets).await;
        let DispatchOutcome::Ready(Response::Snippets { names }) = outcome else {
            panic!("expected a snippet listing");
        };
        assert!(names.contains(&"second".to_string()));
    }
}
