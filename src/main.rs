use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deep_research::domain::{ResearchStatus, SessionFilter};
use deep_research::event_store::{EventStore, FileEventStore};
use deep_research::orchestrator::{list_sessions, load_session, replay_full};
use deep_research::OrchestratorConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deep-research")]
#[command(about = "Inspect event-sourced research sessions")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Configuration file (default: ~/.deep-research/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Event store root, overriding the configuration
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored sessions, newest first
    Sessions {
        /// Only sessions in this status (e.g. complete, failed, searching)
        #[arg(long)]
        status: Option<ResearchStatus>,
        /// Only sessions whose query contains this text
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the current state of a session
    Show {
        id: String,
        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the raw events of a session
    Events {
        id: String,
        /// Only events after this version
        #[arg(long, default_value = "0")]
        from: u64,
    },
    /// Check that snapshot + tail and a full replay agree
    Verify { id: String },
    /// Suggest follow-up queries from the session's knowledge gaps
    FollowUps { id: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::load_default()?,
    };
    Ok(match &cli.store_dir {
        Some(dir) => config.with_store_dir(dir),
        None => config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;
    tracing::debug!(store_dir = %config.store_dir.display(), "Using event store");
    let store = FileEventStore::new(&config.store_dir);

    match cli.command {
        Command::Sessions {
            status,
            query,
            limit,
        } => {
            let filter = SessionFilter {
                status,
                query_contains: query,
                limit,
            };
            let sessions = list_sessions(&store, &filter)
                .await
                .context("Failed to list sessions")?;
            if sessions.is_empty() {
                println!("No sessions found in {}", config.store_dir.display());
                return Ok(());
            }
            for s in sessions {
                let updated = s
                    .updated_at
                    .map(|t| t.0.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {:<12} {:>5.1}%  ${:<8.4} {}  {}",
                    s.id,
                    s.status,
                    s.progress * 100.0,
                    s.cost.total_cost_usd,
                    updated,
                    s.query
                );
            }
        }

        Command::Show { id, json } => {
            let aggregate = require_session(&store, &id).await?;
            let state = aggregate.state();
            if json {
                println!("{}", serde_json::to_string_pretty(state)?);
                return Ok(());
            }
            println!("Session:  {}", aggregate.id());
            println!("Query:    {}", state.query);
            println!("Status:   {}", state.status);
            println!("Version:  {}", aggregate.version());
            println!("Progress: {:.1}%", state.progress * 100.0);
            println!("Cost:     ${:.4}", state.cost.total_cost_usd);
            if let Some(error) = &state.error {
                println!(
                    "Error:    {} (phase: {})",
                    error,
                    state.failed_phase.as_deref().unwrap_or("unknown")
                );
            }
            if let Some(reason) = &state.cancel_reason {
                println!("Cancelled: {}", reason);
            }
            if !state.workers.is_empty() {
                println!();
                println!("Workers:");
                for worker in state.workers_in_order() {
                    let detail = worker.error.as_deref().unwrap_or(&worker.output);
                    println!(
                        "  #{:<3} {:<10} {:<9} {}",
                        worker.worker_num, worker.id, worker.status, detail
                    );
                }
            }
            if let Some(report) = &state.report {
                println!();
                println!("Report: {}", report.title);
                println!("{}", report.summary);
            }
        }

        Command::Events { id, from } => {
            let events = store
                .load_events_from(&id, from)
                .await
                .with_context(|| format!("Failed to load events for session {}", id))?;
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
        }

        Command::Verify { id } => {
            let replayed = replay_full(&store, &id)
                .await
                .with_context(|| format!("Full replay of session {} failed", id))?;
            if replayed.version() == 0 {
                bail!("Session not found: {}", id);
            }
            let loaded = load_session(&store, &id)
                .await
                .with_context(|| format!("Loading session {} failed", id))?;
            let snapshot = store.load_snapshot(&id).await?;

            if loaded.version() != replayed.version() || loaded.state() != replayed.state() {
                bail!(
                    "Session {} diverges: snapshot load at version {}, full replay at version {}",
                    id,
                    loaded.version(),
                    replayed.version()
                );
            }
            match snapshot {
                Some(s) => println!(
                    "OK: {} events, snapshot at version {} matches full replay",
                    replayed.version(),
                    s.version
                ),
                None => println!("OK: {} events, no snapshot", replayed.version()),
            }
        }

        Command::FollowUps { id } => {
            let aggregate = require_session(&store, &id).await?;
            let queries = aggregate.state().follow_up_queries();
            if queries.is_empty() {
                println!("No knowledge gaps recorded for session {}", id);
            }
            for query in queries {
                println!("{}", query);
            }
        }
    }

    Ok(())
}

async fn require_session(
    store: &FileEventStore,
    id: &str,
) -> Result<deep_research::ResearchAggregate> {
    let aggregate = load_session(store, id)
        .await
        .with_context(|| format!("Failed to load session {}", id))?;
    if aggregate.version() == 0 {
        bail!("Session not found: {}", id);
    }
    Ok(aggregate)
}
