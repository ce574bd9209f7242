pub mod openai;
pub mod router;
pub mod traits;
pub mod types;

pub use router::ProviderRouter;
pub use traits::Completion;
pub use types::{ApiType, ChatMessage, ChatRequest, ProviderError};
