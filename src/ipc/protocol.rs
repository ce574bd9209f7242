//! Wire protocol for the host control socket.
//!
//! One JSON object per line. Requests carry a `command` tag using the
//! historical SCREAMING_SNAKE command names; responses carry a `type`
//! tag. Anything that does not decode into [`Request`] gets an error
//! reply, so unlisted commands cannot reach the dispatcher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on a single protocol line, either direction.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    ShowApp,
    HideApp,
    GetListOfSnippets,
    RunSnippet {
        name: String,
        input: String,
    },
    /// Like `RunSnippet`, but the input is read from a file on the host.
    RunSnippetWithFile {
        name: String,
        path: String,
    },
    ReloadChatList,
    SelectChat {
        conversation_id: i64,
    },
    DelChat {
        conversation_id: i64,
        /// Hide instead of removing the row.
        #[serde(default)]
        soft: bool,
    },
    ReloadSnippets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Text { text: String },
    Snippets { names: Vec<String> },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode<T: Serialize>(value: &T) -> Result<String, FrameError> {
    let line = serde_json::to_string(value)?;
    if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: line.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(line)
}

pub fn decode<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, FrameError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: line.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(serde_json::from_str(line.trim())?)
}
