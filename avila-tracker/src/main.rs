//! avila-tracker - drive the Avila Analytics tracker from the command line
//!
//! This tool provides commands for:
//! - Replaying recorded page signals (JSON lines) through auto-instrumentation
//! - Sending one-off custom events and page views
//! - Inspecting and setting the persisted identity
//!
//! Uses XDG Base Directory specification for file locations:
//! - Durable storage: $XDG_DATA_HOME/avila-tracker/storage.db
//! - Logs: $XDG_STATE_HOME/avila-tracker/avila-tracker.log
//! - Config: $XDG_CONFIG_HOME/avila-tracker/config.toml

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use avila_tracker_core::{
    Config, DeliveryHandle, MemoryTransport, PageSignal, Params, SqliteStorage, Tracker,
};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "avila-tracker")]
#[command(about = "Send Avila Analytics events from the command line")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/avila-tracker/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override tracker.measurement_id
    #[arg(long)]
    site: Option<String>,

    /// Print envelopes instead of posting them
    #[arg(long)]
    dry_run: bool,

    /// Enable tracker diagnostics (tracker.debug)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines file of page signals
    Replay {
        /// Signal file, one JSON object per line
        file: PathBuf,
    },

    /// Send one custom event
    Track {
        /// Event name
        name: String,

        /// Event param as key=value (repeatable; values that parse as JSON are kept typed)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Send one page view for the configured page
    PageView,

    /// Show client, session and user identifiers
    Identity,

    /// Persist a user id
    SetUser {
        user_id: String,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    if key.is_empty() {
        return Err("param key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let mut config = Config::load_from(path).context("failed to load configuration")?;
            config
                .apply_env_overrides()
                .context("failed to load configuration")?;
            config
        }
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(site) = &args.site {
        config.tracker.measurement_id = Some(site.clone());
    }
    if args.verbose {
        config.tracker.debug = true;
    }

    let _log_guard =
        avila_tracker_core::logging::init(&config).context("failed to initialize logging")?;

    tracing::info!("avila-tracker starting");

    let dry_run = args.dry_run.then(|| Arc::new(MemoryTransport::new()));
    let tracker = build_tracker(&config, dry_run.clone())?;

    match args.command {
        Command::Replay { file } => cmd_replay(&tracker, &file).await?,
        Command::Track { name, params } => {
            let params: Params = params.into_iter().collect();
            require_site(&tracker)?;
            report(tracker.track(&name, params)).await;
        }
        Command::PageView => {
            require_site(&tracker)?;
            report(tracker.track_page_view()).await;
        }
        Command::Identity => cmd_identity(&tracker),
        Command::SetUser { user_id } => {
            tracker.set_user_id(&user_id);
            println!("User ID set: {}", user_id);
        }
    }

    if let Some(transport) = dry_run {
        for envelope in transport.envelopes() {
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
    }

    Ok(())
}

fn build_tracker(config: &Config, dry_run: Option<Arc<MemoryTransport>>) -> Result<Tracker> {
    let storage_path = Config::storage_path();
    tracing::info!(path = %storage_path.display(), "Opening durable storage");
    let storage = SqliteStorage::open(&storage_path).context("failed to open durable storage")?;

    let environment = config
        .environment
        .to_environment()
        .context("invalid [environment] section")?;

    let mut builder = Tracker::builder(config.tracker.clone())
        .storage(Arc::new(storage))
        .environment(Arc::new(environment));
    if let Some(transport) = dry_run {
        builder = builder.transport(transport);
    }

    builder.build().context("failed to create tracker")
}

fn require_site(tracker: &Tracker) -> Result<()> {
    if tracker.config().measurement_id().is_none() {
        bail!("no measurement id: set tracker.measurement_id in config.toml or pass --site");
    }
    Ok(())
}

async fn report(handle: Option<DeliveryHandle>) {
    match handle {
        Some(handle) => println!("{:?}", handle.outcome().await),
        None => println!("Not sent"),
    }
}

async fn cmd_replay(tracker: &Tracker, file: &PathBuf) -> Result<()> {
    require_site(tracker)?;

    let reader = BufReader::new(
        std::fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?,
    );

    let mut handles: Vec<DeliveryHandle> = tracker.attach().into_iter().collect();
    let mut signals = 0usize;
    let mut scroll_pending = false;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("failed to read signal file")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let signal: PageSignal = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid signal", file.display(), idx + 1))?;
        signals += 1;

        // Consecutive scroll lines behave like one burst of scrolling
        let is_scroll = matches!(signal, PageSignal::Scroll(_));
        if scroll_pending && !is_scroll {
            tracker.settle_scroll().await;
        }
        scroll_pending = is_scroll;

        handles.extend(tracker.handle_signal(&signal));
    }
    if scroll_pending {
        tracker.settle_scroll().await;
    }

    for handle in handles {
        handle.outcome().await;
    }

    let stats = tracker.delivery_stats();
    println!("Endpoint:    {}", tracker.config().collect_url());
    println!("Signals:     {}", signals);
    println!("Dispatched:  {}", stats.dispatched);
    println!("Delivered:   {}", stats.delivered);
    println!("Rejected:    {}", stats.rejected);
    println!("Failed:      {}", stats.failed);

    Ok(())
}

fn cmd_identity(tracker: &Tracker) {
    println!("Client ID:   {}", tracker.client_id());
    println!("Session ID:  {}", tracker.session_id());
    println!(
        "User ID:     {}",
        tracker.get_user_id().as_deref().unwrap_or("<not set>")
    );
}
