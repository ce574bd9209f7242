use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub assistant: Option<String>,
    pub pinned: bool,
    pub visible: bool,
    pub priority: i64,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
