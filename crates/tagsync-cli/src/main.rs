//! # tagsync
//!
//! Command-line client: watch labels, list subscriptions, write and remove
//! objects against a live sync server.

#![deny(unsafe_code)]

use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tagsync_client::{
    AnonymousSession, Engine, SessionProvider, StaticSession, SyncEvent, WebSocketTransport,
};
use tagsync_core::{Label, Object, ObjectId};
use tagsync_settings::SyncSettings;
use tokio::sync::broadcast;

/// Tagsync command-line client.
#[derive(Parser, Debug)]
#[command(name = "tagsync", about = "Label-subscribed object sync client")]
struct Cli {
    /// Settings file (defaults to `~/.tagsync/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Server origin, e.g. `wss://sync.example.com`.
    #[arg(long)]
    origin: Option<String>,

    /// Actor id to act as. Without it the session is anonymous.
    #[arg(long)]
    actor: Option<String>,

    /// Connection token sent with the actor.
    #[arg(long, requires = "actor")]
    token: Option<String>,

    /// Seconds to wait for the channel to open.
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to labels and print matching objects as they change.
    Watch {
        /// Labels to follow.
        #[arg(required = true)]
        labels: Vec<String>,
    },
    /// List the labels the server has this client subscribed to.
    Ls,
    /// Create or replace an object given as JSON (`-` reads stdin).
    Put {
        /// The object, e.g. `{"context":["news"],"title":"hi"}`.
        object: String,
    },
    /// Remove an object by id.
    Rm {
        /// Object id.
        id: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<SyncSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tagsync_settings::settings_path);
        let mut settings = tagsync_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(origin) = &self.origin {
            settings.server.origin.clone_from(origin);
            tagsync_settings::validate(&settings).context("Invalid --origin")?;
        }
        Ok(settings)
    }

    fn session(&self) -> Arc<dyn SessionProvider> {
        match &self.actor {
            Some(actor) => Arc::new(StaticSession::new(actor.as_str(), self.token.clone())),
            None => Arc::new(AnonymousSession),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    let _ = tagsync_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let engine = Engine::builder(settings)
        .session(cli.session())
        .transport(Arc::new(WebSocketTransport::new()))
        .build();
    engine.start();

    let result = run(&engine, cli.command, Duration::from_secs(cli.connect_timeout)).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &Engine, command: Command, connect_timeout: Duration) -> Result<()> {
    if let Command::Watch { labels } = command {
        return watch(engine, labels).await;
    }

    tokio::time::timeout(connect_timeout, engine.connection_state(true))
        .await
        .with_context(|| {
            format!(
                "Could not connect to {} within {}s",
                engine.settings().server.origin,
                connect_timeout.as_secs()
            )
        })?;

    match command {
        Command::Ls => {
            for label in engine.my_labels().await? {
                println!("{label}");
            }
        }
        Command::Put { object } => {
            let object = parse_object(&object)?;
            let id = engine.update(object).await?;
            println!("{id}");
        }
        Command::Rm { id } => {
            engine.remove(&ObjectId::from(id)).await?;
        }
        Command::Watch { .. } => {}
    }
    Ok(())
}

async fn watch(engine: &Engine, labels: Vec<String>) -> Result<()> {
    let labels: Vec<Label> = labels.into_iter().map(Label::from).collect();
    let mut events = engine.events();
    let mut view = engine.objects_for_labels(labels.clone());
    engine.subscribe(labels).await;
    tracing::info!(labels = ?view.labels(), "watching");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                tracing::info!("Shutting down...");
                return Ok(());
            }
            () = view.changed() => {
                for object in view.objects() {
                    println!("{}", Value::from(object));
                }
            }
            event = events.recv() => match event {
                Ok(SyncEvent::ServerError(payload)) => eprintln!("server error: {payload}"),
                Ok(SyncEvent::LoggedOut) => eprintln!("logged out by server"),
                Ok(event) => tracing::debug!(event = event.name(), "engine event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Parse an object from JSON text, or stdin when `text` is `-`.
fn parse_object(text: &str) -> Result<Object> {
    let text = if text == "-" {
        let mut buf = String::new();
        let _ = std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        text.to_owned()
    };
    let value: Value = serde_json::from_str(&text).context("Object is not valid JSON")?;
    if !value.is_object() {
        bail!("Object must be a JSON object");
    }
    Ok(Object::from_value(value)?)
}
