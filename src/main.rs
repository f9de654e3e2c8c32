use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use tracing_subscriber::EnvFilter;

use hindsight::config::HindsightConfig;
use hindsight::embedding::model::OnnxModel;
use hindsight::embedding::{EmbeddingProvider, UnavailableProvider};
use hindsight::engine::{Engine, SaveRequest};
use hindsight::hooks;
use hindsight::store::search::{SearchMode, SearchOptions};
use hindsight::store::types::{EntryType, Tier};
use hindsight::store::EntryFilter;
use hindsight::sync::object_store::DirStore;
use hindsight::sync::{self, Replicator};
use hindsight::cli;

#[derive(Parser)]
#[command(name = "hindsight", version, about = "Per-user memory engine for coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lifecycle hooks invoked by the session supervisor (stdin JSON)
    Hook {
        #[command(subcommand)]
        event: HookEvent,
    },
    /// Save an entry (content as argument, or piped on stdin)
    Save {
        content: Option<String>,
        #[arg(short = 't', long = "type", default_value = "insight")]
        entry_type: EntryType,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        tier: Option<Tier>,
        #[arg(long)]
        pinned: bool,
        #[arg(long)]
        agent: Option<String>,
        /// Changed files for git_commit entries (comma-separated)
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,
    },
    /// Retrieve entries by hybrid, lexical, or vector search
    Search {
        query: String,
        #[arg(short = 't', long = "type")]
        entry_type: Option<EntryType>,
        #[arg(long)]
        days: Option<u32>,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        tier: Option<Tier>,
        #[arg(long)]
        archived: bool,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = "auto")]
        mode: String,
    },
    /// List recent entries
    List {
        #[arg(short = 't', long = "type")]
        entry_type: Option<EntryType>,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        archived: bool,
    },
    /// Manage persistent rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Show store counters
    Status,
    /// Run the lifecycle passes (decay, demote, promote, consolidate)
    Maintain,
    /// Run one incremental transcript scan
    Scan,
    /// Cross-host replication
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Long-lived process: replication cycle every 120 seconds
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum HookEvent {
    /// Print the context packet for a fresh session
    SessionStart,
    /// Turn-end capture: transcript scan + rate-limited handoff
    Stop,
    /// Safety-net scan + compaction snapshot
    PreCompact,
}

#[derive(Subcommand)]
enum RulesAction {
    /// Create or replace a rule by label
    Set { label: String, content: String },
    /// Delete a rule by label
    Delete { label: String },
    /// List all rules
    List,
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run one push/pull cycle now
    Now,
    /// Show replication state
    Status,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the models cache
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HindsightConfig::load()?;

    // Log to stderr so stdout stays clean for injected hook output
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        // Hooks never fail the supervisor: log, print what we have, exit 0
        Command::Hook { event } => {
            if let Err(e) = run_hook(event, config) {
                tracing::error!(error = %e, "hook failed");
            }
            Ok(())
        }
        Command::Save { content, entry_type, tags, tier, pinned, agent, files } => {
            let content = match content {
                Some(c) => c,
                None => read_stdin()?,
            };
            let mut engine = open_engine(config)?;
            let mut request = SaveRequest::new(content, entry_type);
            request.tags = tags;
            request.tier = tier;
            request.pinned = pinned;
            request.agent_id = agent;
            request.files = files;
            let outcome = engine.save(request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Search { query, entry_type, days, limit, tier, archived, project, mode } => {
            let mut engine = open_engine(config)?;
            let opts = SearchOptions {
                entry_type,
                days,
                limit,
                tier,
                include_archived: archived,
                project,
            };
            let hits = engine.search(&query, &opts, parse_mode(&mode)?)?;
            for hit in hits {
                println!(
                    "{:.4}  [{}] {} {}  {}",
                    hit.score,
                    hit.entry.entry_type,
                    hit.entry.date,
                    hit.entry.time,
                    first_line(&hit.entry.content)
                );
            }
            Ok(())
        }
        Command::List { entry_type, days, archived } => {
            let engine = open_engine_readonly(config)?;
            let entries = engine.store().list(&EntryFilter {
                entry_type,
                days,
                include_archived: archived,
            })?;
            for entry in entries {
                println!(
                    "{}  [{}] {} {}  {}",
                    entry.id,
                    entry.entry_type,
                    entry.date,
                    entry.time,
                    first_line(&entry.content)
                );
            }
            Ok(())
        }
        Command::Rules { action } => {
            let mut engine = open_engine(config)?;
            match action {
                RulesAction::Set { label, content } => {
                    let rule = engine.save_rule(&label, &content)?;
                    println!("rule '{label}' saved ({})", rule.id);
                }
                RulesAction::Delete { label } => {
                    if engine.store_mut().delete_rule(&label)? {
                        println!("rule '{label}' deleted");
                    } else {
                        println!("no rule named '{label}'");
                    }
                }
                RulesAction::List => {
                    for rule in engine.store().list_rules()? {
                        let label = rule.label.as_deref().unwrap_or("unlabeled");
                        println!("[{label}] {}", rule.content);
                    }
                }
            }
            Ok(())
        }
        Command::Status => {
            let engine = open_engine_readonly(config)?;
            let status = engine.store().status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Maintain => {
            let mut engine = open_engine(config)?;
            let report = engine.run_maintenance()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Scan => {
            let mut engine = open_engine(config)?;
            let report = engine.scan_transcripts()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Sync { action } => {
            let mut engine = open_engine(config.clone())?;
            match action {
                SyncAction::Now => {
                    let replicator = build_replicator(&config, &engine)?;
                    let mut state = sync::load_state(engine.base_dir(), &config.sync)?;
                    let (store, embedder) = engine.sync_parts();
                    let report = replicator.cycle(store, embedder, &mut state);
                    sync::save_state(engine.base_dir(), &state)?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    if let Some(error) = report.error {
                        bail!("sync cycle had errors: {error}");
                    }
                }
                SyncAction::Status => {
                    let state = sync::load_state(engine.base_dir(), &config.sync)?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
            }
            Ok(())
        }
        Command::Serve => serve(config).await,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await,
        },
    }
}

/// Open the engine with the real model, degrading to the unavailable
/// provider when model files are missing.
fn open_engine(config: HindsightConfig) -> Result<Engine> {
    let provider: Box<dyn EmbeddingProvider> = match OnnxModel::load(&config.embedding) {
        Ok(model) => Box::new(model),
        Err(e) => {
            tracing::warn!(error = %e, "embedding model unavailable");
            Box::new(UnavailableProvider)
        }
    };
    Engine::open(config, provider)
}

/// Listing/status paths never embed; skip model init entirely.
fn open_engine_readonly(config: HindsightConfig) -> Result<Engine> {
    Engine::open(config, Box::new(UnavailableProvider))
}

fn run_hook(event: HookEvent, config: HindsightConfig) -> Result<()> {
    let stdin = read_stdin().unwrap_or_default();
    let mut engine = open_engine(config)?;

    match event {
        HookEvent::SessionStart => {
            let input: hooks::SessionStartInput =
                serde_json::from_str(&stdin).unwrap_or(hooks::SessionStartInput { source: None });
            let packet = hooks::session_start(&mut engine, &input)?;
            println!("{packet}");
        }
        HookEvent::Stop => {
            let input: hooks::StopInput = serde_json::from_str(&stdin)
                .unwrap_or(hooks::StopInput { stop_hook_active: false });
            let status = hooks::stop(&mut engine, &input)?;
            if !status.is_empty() {
                tracing::info!(status = %status, "stop hook complete");
            }
        }
        HookEvent::PreCompact => {
            let input: hooks::PreCompactInput =
                serde_json::from_str(&stdin).unwrap_or(hooks::PreCompactInput {
                    trigger: None,
                    custom_instructions: None,
                });
            let status = hooks::pre_compact(&mut engine, &input)?;
            tracing::info!(status = %status, "pre-compact hook complete");
        }
    }
    Ok(())
}

fn build_replicator(config: &HindsightConfig, engine: &Engine) -> Result<Replicator> {
    if config.sync.store_dir.is_empty() {
        bail!("sync.store_dir is not configured");
    }
    let root = hindsight::config::expand_tilde(&config.sync.store_dir);
    Ok(Replicator::new(
        Box::new(DirStore::new(root)),
        engine.base_dir().clone(),
    ))
}

/// Replication loop: one cycle per tick, ticks serialized, a still-running
/// cycle skips the next tick. Ctrl-C shuts the timer down.
async fn serve(config: HindsightConfig) -> Result<()> {
    if !config.sync.enabled {
        bail!("sync is disabled; set sync.enabled = true to serve");
    }
    let mut engine = open_engine(config.clone())?;
    let replicator = build_replicator(&config, &engine)?;
    let mut state = sync::load_state(engine.base_dir(), &config.sync)?;

    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(config.sync.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(interval = config.sync.interval_secs, "replication scheduler running");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (store, embedder) = engine.sync_parts();
                let report = replicator.cycle(store, embedder, &mut state);
                match &report.error {
                    Some(error) => tracing::error!(error = %error, "replication cycle had errors"),
                    None => tracing::debug!(pushed = report.pushed, pulled = report.pulled, "replication cycle done"),
                }
                if let Err(e) = sync::save_state(engine.base_dir(), &state) {
                    tracing::error!(error = %e, "failed to persist sync state");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn parse_mode(mode: &str) -> Result<SearchMode> {
    match mode {
        "auto" => Ok(SearchMode::Auto),
        "fast" => Ok(SearchMode::Fast),
        "semantic" => Ok(SearchMode::Semantic),
        "hybrid" => Ok(SearchMode::Hybrid),
        other => bail!("unknown search mode: {other} (auto|fast|semantic|hybrid)"),
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read stdin")?;
    Ok(buf.trim().to_string())
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}
