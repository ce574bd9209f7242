pub mod client;
pub mod host;
pub mod protocol;

pub use client::{Client, IpcError};
pub use protocol::{Request, Response, MAX_FRAME_BYTES};
