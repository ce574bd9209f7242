pub mod chat;
pub mod database;
pub mod dispatcher;

pub use chat::{ChatError, ChatService};
pub use database::{Database, ListFilter, ListOrder, StoreError};
pub use dispatcher::{AppChannels, AppContext, DispatchOutcome, UiEvent, WorkerDone};
