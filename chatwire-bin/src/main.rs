use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use chatwire_core::{
    client::ChatClient,
    config::Config,
    credentials::Credentials,
    guard::{Navigation, RouteGuard},
    model::{ChatRequest, FileRef, RegisterRequest},
    source::ReplaySource,
    stream::{self, CallbackSet, StreamOutcome},
};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const TOKEN_ENV: &str = "CHATWIRE_TOKEN";

#[derive(Parser)]
#[command(author, version, about = "chatwire: command-line client for the chat backend", long_about = None)]
struct Cli {
    /// JSON or TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `api.base_url` from the config
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the access token (export it as CHATWIRE_TOKEN)
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "CHATWIRE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "CHATWIRE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Send a message and print the reply as it streams (Ctrl-C cancels)
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(short, long, help = "Continue an existing session")]
        session: Option<String>,
        #[arg(long, help = "Attach an image file (uploaded first)")]
        image: Vec<PathBuf>,
    },
    /// List chat sessions
    Sessions,
    /// Print the stored messages of a session
    Messages { session: String },
    /// Delete a session
    Delete { session: String },
    /// Upload a file
    Upload { path: PathBuf },
    /// Synthesize speech and write it to a file
    Tts {
        text: String,
        #[arg(short, long, default_value = "speech.mp3")]
        out: PathBuf,
    },
    /// Decode a captured event-stream body offline
    Replay {
        path: PathBuf,
        #[arg(long, help = "Re-cut the body into chunks of this many bytes")]
        chunk: Option<usize>,
    },
    /// Show where the route guard sends a path
    Route { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(base) = cli.base_url {
        cfg.api.base_url = base;
    }
    init_logging(&cfg);

    let credentials = match std::env::var(TOKEN_ENV) {
        Ok(token) => Credentials::with_token(token),
        Err(_) => Credentials::new(),
    };
    let client = ChatClient::new(&cfg, credentials.clone())?;

    match cli.command {
        Commands::Login { username, password } => {
            let token = client.login(&username, &SecretString::from(password)).await?;
            println!("{}", token.access_token);
        }
        Commands::Register {
            username,
            email,
            password,
        } => {
            let user = client
                .register(&RegisterRequest::new(
                    username,
                    email,
                    SecretString::from(password),
                ))
                .await?;
            println!("registered {} (id {})", user.username, user.id);
        }
        Commands::Chat {
            message,
            session,
            image,
        } => {
            let mut req = ChatRequest::new(message);
            if let Some(session) = session {
                req = req.in_session(session);
            }
            for path in &image {
                let upload = client.upload_path(path).await?;
                req = req.with_file(FileRef::image_from_upload(&upload));
            }

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let mut handler = printing_handler();
            let summary = client.stream_chat(&req, &mut handler, &cancel).await;
            finish(summary.outcome, summary.session_id.as_deref())?;
        }
        Commands::Sessions => {
            for s in client.list_sessions().await? {
                println!(
                    "{}\t{}\t{}",
                    s.id,
                    s.updated_at.as_deref().unwrap_or("-"),
                    s.title.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Messages { session } => {
            for m in client.list_messages(&session).await? {
                println!("[{:?}] {}", m.role, m.content);
            }
        }
        Commands::Delete { session } => {
            let status = client.delete_session(&session).await?;
            println!(
                "{}: {}",
                status.status,
                status.message.as_deref().unwrap_or("")
            );
        }
        Commands::Upload { path } => {
            let up = client.upload_path(&path).await?;
            println!("{}\t{}\t{}", up.file_id, up.filename, up.url);
        }
        Commands::Tts { text, out } => {
            let clip = client.tts(&text).await?;
            tokio::fs::write(&out, &clip.bytes)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            eprintln!(
                "wrote {} bytes ({}) to {}",
                clip.bytes.len(),
                clip.content_type.as_deref().unwrap_or("unknown type"),
                out.display()
            );
        }
        Commands::Replay { path, chunk } => {
            let body = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let mut source = ReplaySource::from_text(&body);
            if let Some(size) = chunk {
                source = source.chunked(size);
            }
            let mut handler = printing_handler();
            let summary = stream::run(
                &source,
                &ChatRequest::new(""),
                &mut handler,
                &CancellationToken::new(),
                cfg.stream.on_silent_close,
            )
            .await;
            eprintln!(
                "[frames: {}, messages: {}, malformed: {}]",
                summary.frames, summary.messages, summary.malformed
            );
            finish(summary.outcome, summary.session_id.as_deref())?;
        }
        Commands::Route { path } => {
            let guard = RouteGuard::new(&cfg.routes)?;
            match guard.check(&path, &credentials) {
                Navigation::Proceed => println!("proceed"),
                Navigation::Redirect(to) => println!("redirect {to}"),
            }
        }
    }

    Ok(())
}

fn printing_handler() -> CallbackSet<'static> {
    CallbackSet::new()
        .with_message(|text| {
            print!("{text}");
            io::stdout().flush().ok();
        })
        .with_session_update(|id| eprintln!("[session: {id}]"))
        .with_done(|| println!())
        .with_error(|failure| eprintln!("\n[error: {failure}]"))
}

fn finish(outcome: StreamOutcome, session_id: Option<&str>) -> anyhow::Result<()> {
    if let Some(id) = session_id {
        tracing::debug!(session_id = id, "stream ended");
    }
    match outcome {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Cancelled => {
            eprintln!("\n[cancelled]");
            Ok(())
        }
        other => bail!("chat stream ended: {}", other.as_str()),
    }
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(cfg.logging.ansi)
        .with_writer(io::stderr)
        .init();
}
