use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use super::protocol::{self, FrameError, Request, Response};

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("host is not running (no socket at {path})", path = .path.display())]
    NotRunning { path: PathBuf },

    #[error("no reply within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("connection closed before a reply arrived")]
    Disconnected,

    #[error(transparent)]
    Protocol(#[from] FrameError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One-shot request client for the host socket. Fails fast when no host
/// is listening; never retries.
pub struct Client {
    path: PathBuf,
    reply_timeout: Duration,
}

impl Client {
    pub fn new(path: impl Into<PathBuf>, reply_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            reply_timeout,
        }
    }

    /// Connect, send one request, wait for its reply.
    pub async fn request(&self, request: &Request) -> Result<Response, IpcError> {
        let stream = match UnixStream::connect(&self.path).await {
            Ok(stream) => stream,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(IpcError::NotRunning {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let (read_half, mut write_half) = stream.into_split();

        let line = protocol::encode(request)?;
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        let read = timeout(self.reply_timeout, reader.read_line(&mut reply))
            .await
            .map_err(|_| IpcError::Timeout(self.reply_timeout))??;
        if read == 0 {
            return Err(IpcError::Disconnected);
        }
        Ok(protocol::decode(&reply)?)
    }
}
