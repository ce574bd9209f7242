use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quill::config::{resolve_socket, AppConfig, Paths};
use quill::ipc::{Client, Request, Response};

#[derive(Parser)]
#[command(name = "quillctl")]
#[command(about = "Remote control for the quill host", long_about = None)]
struct Cli {
    /// Socket path (defaults to QUILL_SOCKET, then the config file).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seconds to wait for a reply (overrides the config file).
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[command(rename_all = "SCREAMING_SNAKE_CASE")]
enum Command {
    /// Bring the host window to the front.
    ShowApp,
    /// Hide the host window.
    HideApp,
    /// List the snippet names known to the host.
    GetListOfSnippets,
    /// Run a snippet on the given text.
    RunSnippet { name: String, input: String },
    /// Run a snippet on a file's contents.
    RunSnippetWithFile { name: String, path: String },
    /// Ask the host to re-read the chat list.
    ReloadChatList,
    /// Select a conversation in the host UI.
    SelectChat { conversation_id: i64 },
    /// Delete a conversation.
    DelChat {
        conversation_id: i64,
        /// Hide it instead of deleting permanently.
        #[arg(long)]
        soft: bool,
    },
    /// Rescan the snippet and assistant folders.
    ReloadSnippets,
}

impl From<Command> for Request {
    fn from(command: Command) -> Self {
        match command {
            Command::ShowApp => Request::ShowApp,
            Command::HideApp => Request::HideApp,
            Command::GetListOfSnippets => Request::GetListOfSnippets,
            Command::RunSnippet { name, input } => Request::RunSnippet { name, input },
            Command::RunSnippetWithFile { name, path } => {
                Request::RunSnippetWithFile { name, path }
            }
            Command::ReloadChatList => Request::ReloadChatList,
            Command::SelectChat { conversation_id } => Request::SelectChat { conversation_id },
            Command::DelChat {
                conversation_id,
                soft,
            } => Request::DelChat {
                conversation_id,
                soft,
            },
            Command::ReloadSnippets => Request::ReloadSnippets,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve();
    let config = AppConfig::load(&paths.config_file)?;

    let socket = resolve_socket(cli.socket, &config, &paths);
    // The host answers with its own timeout error at reply_timeout_secs;
    // wait a little past that before giving up locally.
    let wait = cli
        .timeout_secs
        .unwrap_or(config.ipc.reply_timeout_secs + 2);

    let client = Client::new(socket, Duration::from_secs(wait));
    match client.request(&Request::from(cli.command)).await? {
        Response::Ack => println!("ok"),
        Response::Text { text } => println!("{text}"),
        Response::Snippets { names } => {
            for name in names {
                println!("{name}");
            }
        }
        Response::Error { message } => bail!(message),
    }
    Ok(())
}
