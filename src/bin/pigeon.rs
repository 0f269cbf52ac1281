//! Command-line front end for pigeon.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use pigeon::server::{Broadcaster, IngestConfig, IngestHandler, IngestServer};
use pigeon::shared::http_constants::{DEFAULT_INGEST_PORT, X_EVENT_TYPE};
use pigeon::shared::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use pigeon::shared::{HttpRequest, HttpResponse};
use pigeon::{Coordinator, CoordinatorStatus, StreamStore, TextEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pigeon")]
#[command(about = "Watch live Server-Sent Events feeds")]
#[command(version)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn", env = "PIGEON_LOG_LEVEL")]
    log_level: LogLevel,

    /// Log format: json, pretty or compact
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Stream list file
    #[arg(long, global = true, env = "PIGEON_STREAMS_FILE")]
    streams_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a stream and print its events
    Watch(WatchArgs),

    /// Manage saved streams
    Streams {
        #[command(subcommand)]
        action: StreamsCommand,
    },

    /// Run only the ingest server, relaying every POST to SSE subscribers
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_INGEST_PORT)]
        port: u16,
    },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Stream URL
    url: Option<String>,

    /// Name of a saved stream
    #[arg(long, conflicts_with = "url")]
    stream: Option<String>,

    /// Only show events whose payload contains this text (case-insensitive)
    #[arg(long)]
    search: Option<String>,

    /// Only show events of this kind
    #[arg(long)]
    kind: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Ingest port used for local targets
    #[arg(long, default_value_t = DEFAULT_INGEST_PORT)]
    port: u16,

    /// Extra request header, as `Name: value`
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
enum StreamsCommand {
    /// List saved streams
    List,
    /// Save a stream
    Add {
        /// Display name
        name: String,
        /// Stream URL
        url: String,
    },
    /// Remove a saved stream
    Remove {
        /// Display name
        name: String,
    },
    /// Restore the built-in streams
    Reset,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig {
        level: cli.log_level,
        format: cli.log_format,
        ..LogConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let store = match cli.streams_file {
        Some(path) => StreamStore::open(path),
        None => StreamStore::open(
            StreamStore::default_path().context("cannot locate a config directory")?,
        ),
    };

    match cli.command {
        Command::Watch(args) => watch(args, &store).await,
        Command::Streams { action } => streams(action, &store),
        Command::Serve { port } => serve(port).await,
    }
}

async fn watch(args: WatchArgs, store: &StreamStore) -> anyhow::Result<()> {
    let url = match (args.url, args.stream) {
        (Some(url), _) => url,
        (None, Some(name)) => {
            store
                .find(&name)
                .with_context(|| format!("no saved stream named `{name}`"))?
                .url
        },
        (None, None) => bail!("give a stream URL or --stream NAME"),
    };

    let mut builder = Coordinator::builder().ingest_port(args.port);
    for (name, value) in args.headers {
        builder = builder.client_header(name, value);
    }
    let coordinator = builder.spawn();

    let mut feed = coordinator.event_feed();
    let mut status = coordinator.subscribe();
    coordinator.connect(&url).await?;
    report_status(&status.borrow_and_update());

    let search = args.search.unwrap_or_default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = feed.recv() => match received {
                Ok(logged) => {
                    let event = &logged.event;
                    if !event.payload_contains(&search) {
                        continue;
                    }
                    if args.kind.as_deref().is_some_and(|kind| kind != event.kind()) {
                        continue;
                    }
                    print_event(event, args.json)?;
                },
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                report_status(&status.borrow_and_update());
            },
        }
    }

    coordinator.shutdown().await?;
    Ok(())
}

fn print_event(event: &TextEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let time = event.received_at().format("%H:%M:%S%.3f");
    let payload = event.payload().unwrap_or_default();
    if event.id().is_empty() {
        println!("{} [{}] {}", time, event.kind(), payload);
    } else {
        println!("{} [{}] #{} {}", time, event.kind(), event.id(), payload);
    }
    Ok(())
}

fn report_status(status: &CoordinatorStatus) {
    let target = status.target.as_deref().unwrap_or("-");
    eprintln!("* {} ({})", status.state, target);
    if let Some(warning) = &status.warning {
        eprintln!("  warning: {}", warning);
    }
    if let Some(error) = &status.last_error {
        eprintln!("  last error: {}", error);
    }
}

fn streams(action: StreamsCommand, store: &StreamStore) -> anyhow::Result<()> {
    match action {
        StreamsCommand::List => {
            for stream in store.load() {
                println!("{}\t{}", stream.name, stream.url);
            }
        },
        StreamsCommand::Add { name, url } => {
            let stream = store.add(&name, &url)?;
            println!("saved {} -> {}", stream.name, stream.url);
        },
        StreamsCommand::Remove { name } => {
            if !store.remove(&name)? {
                bail!("no saved stream named `{name}`");
            }
            println!("removed {}", name);
        },
        StreamsCommand::Reset => {
            store.clear()?;
            println!("restored built-in streams");
        },
    }
    Ok(())
}

/// Rebroadcasts every POST body to the SSE subscribers.
struct Relay {
    subscribers: Broadcaster,
}

#[async_trait]
impl IngestHandler for Relay {
    async fn on_request(&self, request: HttpRequest) -> HttpResponse {
        if request.body.is_empty() {
            return HttpResponse::ok(None).with_cors();
        }
        let kind = request.headers.get(X_EVENT_TYPE);
        let delivered = self.subscribers.broadcast(kind, &request.body, None);
        info!(delivered, "Relayed POST");
        HttpResponse::json(serde_json::json!({ "delivered": delivered }).to_string()).with_cors()
    }
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let subscribers = Broadcaster::new();
    let handler = Arc::new(Relay {
        subscribers: subscribers.clone(),
    });
    let config = IngestConfig::builder().port(port).build();
    let mut server = IngestServer::start_with_broadcaster(config, handler, subscribers).await?;
    eprintln!("relaying on http://{}/", server.local_addr());

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
