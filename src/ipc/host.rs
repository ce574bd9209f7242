use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{self, Request, Response};
use crate::services::dispatcher::{self, AppChannels, AppContext, DispatchOutcome, UiEvent};

/// Serve the control socket until the token is cancelled. Owns the host
/// queues: worker results are completed here and UI events drained here.
pub async fn run(
    ctx: Arc<AppContext>,
    mut channels: AppChannels,
    socket_path: PathBuf,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let listener = bind_socket(&socket_path).await?;
    let reply_timeout = Duration::from_secs(ctx.config.ipc.reply_timeout_secs);
    info!(event = "host_start", socket = %socket_path.display());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(ctx, stream, reply_timeout).await;
                        });
                    }
                    Err(e) => warn!(event = "host_accept_error", error = %e),
                }
            }
            done = channels.worker_rx.recv() => {
                if let Some(done) = done {
                    dispatcher::finish_snippet(&ctx, done);
                }
            }
            event = channels.ui_rx.recv() => {
                if let Some(event) = event {
                    log_ui_event(&event);
                }
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    info!(event = "host_stop", socket = %socket_path.display());
    Ok(())
}

/// Bind the listener, clearing a leftover socket file first. A socket
/// that still accepts connections means another host owns it.
async fn bind_socket(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        match UnixStream::connect(path).await {
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("another host is already listening on {}", path.display()),
                ));
            }
            Err(_) => {
                std::fs::remove_file(path)?;
            }
        }
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

async fn handle_connection(ctx: Arc<AppContext>, stream: UnixStream, reply_timeout: Duration) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(event = "conn_read_error", error = %e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match protocol::decode(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(event = "bad_request_frame", error = %e);
                let reply = Response::Error {
                    message: format!("bad request: {e}"),
                };
                let _ = write_response(&mut write_half, &reply).await;
                break;
            }
        };

        let response = match dispatcher::dispatch(&ctx, request).await {
            DispatchOutcome::Ready(response) => response,
            DispatchOutcome::Pending(rx) => match timeout(reply_timeout, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => Response::Error {
                    message: "worker dropped the reply".to_string(),
                },
                Err(_) => Response::Error {
                    message: format!(
                        "no result within {}s, the snippet is still running",
                        reply_timeout.as_secs()
                    ),
                },
            },
        };

        if let Err(e) = write_response(&mut write_half, &response).await {
            debug!(event = "conn_write_error", error = %e);
            break;
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> io::Result<()> {
    let line = protocol::encode(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

fn log_ui_event(event: &UiEvent) {
    match event {
        UiEvent::WindowShown => info!(event = "window_shown"),
        UiEvent::WindowHidden => info!(event = "window_hidden"),
        UiEvent::ChatListReloaded(list) => {
            info!(event = "chat_list_reloaded", conversations = list.len())
        }
        UiEvent::ChatSelected {
            conversation,
            transcript,
        } => info!(
            event = "chat_selected",
            conversation_id = conversation.id,
            messages = transcript.len()
        ),
        UiEvent::SnippetsReloaded {
            snippets,
            assistants,
        } => info!(
            event = "snippets_reloaded",
            snippets = snippets.len(),
            assistants = assistants.len()
        ),
        UiEvent::SnippetFinished {
            job_id,
            snippet,
            ok,
        } => info!(event = "snippet_finished", job = %job_id, snippet = %snippet, ok),
    }
}
