pub mod config;
pub mod ipc;
pub mod models;
pub mod providers;
pub mod services;
pub mod units;

// Re-export key types
pub use config::{AppConfig, Paths, Secrets};
pub use ipc::{Client, IpcError, Request, Response};
pub use models::{Conversation, Message, MessageKind};
pub use providers::{ApiType, Completion, ProviderError, ProviderRouter};
pub use services::{AppContext, ChatService, Database, StoreError, UiEvent};
pub use units::{PromptUnit, UnitRegistry};
