use crate::{
    commands::{Commands, GlobalArgs, QueueSide},
    config::HarvestConfig,
    error::CliError,
    output::QueueDepths,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use harvest_core::{
    broker::sled_broker::SledBroker,
    models::StateUpdate,
    retry::{RetryError, RetryPolicy},
    store::sled_store::SledDocumentStore,
};
use harvest_sync::{error::ReconcileError, reconciler::Reconciler};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "harvest",
    version = "0.1.0",
    about = "Checkpointed record harvesting with fenced queue recovery"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.log_level.as_deref());

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();
    let cancel_token = shutdown.cancel_token();

    let code = tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::Success,
            Err(err) => {
                error!("{err}");
                ExitCode::GeneralError
            }
        },
        _ = cancel_token.cancelled() => ExitCode::ShutdownRequested,
    };

    std::process::exit(code.as_i32());
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = HarvestConfig::resolve(&cli.global)?;
    let policy = config.retry_policy();
    let reconciler = open_reconciler(&config)?;
    let reconciler = &reconciler;

    match cli.command {
        Commands::Status { json } => {
            let checkpoint = with_retry(&policy, move || reconciler.checkpoint()).await?;
            if json {
                output::print_json(&checkpoint)?;
            } else {
                output::print_checkpoint(&checkpoint)?;
            }
        }
        Commands::Commit {
            status,
            fields,
            records,
            json,
        } => {
            let update = fields
                .into_iter()
                .fold(StateUpdate::new(status), |update, (key, value)| {
                    update.with_field(key, value)
                });
            let payloads = match records {
                Some(path) => read_records(&path).await?,
                None => Vec::new(),
            };

            let (update, payloads) = (&update, &payloads);
            let report = with_retry(&policy, move || {
                reconciler.commit_and_drain(update.clone(), payloads)
            })
            .await?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_commit(&report);
            }
        }
        Commands::Recover { json } => {
            let report = with_retry(&policy, move || reconciler.recover()).await?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_drain(&report);
            }
        }
        Commands::Depth { json } => {
            let queues = reconciler.queues();
            let depths = QueueDepths {
                staging_queue: &queues.staging,
                staging: with_retry(&policy, move || reconciler.staging_depth()).await?,
                main_queue: &queues.main,
                main: with_retry(&policy, move || reconciler.main_queue_depth()).await?,
            };
            if json {
                output::print_json(&depths)?;
            } else {
                output::print_depths(&depths);
            }
        }
        Commands::Peek { queue, limit } => {
            let messages = match queue {
                QueueSide::Staging => {
                    with_retry(&policy, move || reconciler.peek_staging(limit)).await?
                }
                QueueSide::Main => with_retry(&policy, move || reconciler.peek_main(limit)).await?,
            };
            output::print_messages(&messages);
        }
    }

    Ok(())
}

fn open_reconciler(config: &HarvestConfig) -> Result<Reconciler, CliError> {
    let store = Arc::new(SledDocumentStore::open(config.state_path())?);
    let broker = Arc::new(SledBroker::open(config.queues_path())?);
    info!(data_dir = %config.data_dir.display(), "Opened harvest data");

    Ok(Reconciler::new(store, broker, config.reconciler()))
}

/// Reads one JSON record per non-blank line and re-serializes each compactly.
async fn read_records(path: &Path) -> Result<Vec<Vec<u8>>, CliError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_records(&content)
}

fn parse_records(content: &str) -> Result<Vec<Vec<u8>>, CliError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<serde_json::Value>(line)
                .map(|value| value.to_string().into_bytes())
                .map_err(|source| CliError::InvalidRecord {
                    line: idx + 1,
                    source,
                })
        })
        .collect()
}

async fn with_retry<F, Fut, T>(policy: &RetryPolicy, op: F) -> Result<T, CliError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ReconcileError>>,
{
    policy
        .run(op, ReconcileError::disposition)
        .await
        .map_err(|err| CliError::Reconcile(RetryError::into_inner(err)))
}
