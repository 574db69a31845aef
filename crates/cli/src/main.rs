//! Doctrail CLI - replays traversals against JSON repository fixtures

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doctrail_indexer::{
    ChangedItem, GenealogistStatistics, MemoryRepository, TraversalConfig, TraversalManager,
    TraversalOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Doctrail - incremental change traversal over document repositories
#[derive(Parser)]
#[command(name = "doctrail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a single batch from a checkpoint
    Traverse {
        #[command(flatten)]
        source: Source,
        /// Checkpoint returned by an earlier batch (default: start from scratch)
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Start and resume until the repository is up to date
    Exhaust {
        #[command(flatten)]
        source: Source,
        /// Stop after this many calls
        #[arg(long, default_value = "10000")]
        max_calls: usize,
    },
    /// Print the JSON schema of the traversal configuration
    Schema,
}

#[derive(Args)]
struct Source {
    /// JSON repository fixture
    #[arg(long)]
    fixture: PathBuf,
    /// TOML traversal configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured batch size
    #[arg(long)]
    batch_size: Option<usize>,
}

impl Source {
    fn manager(&self) -> Result<TraversalManager> {
        let repository = MemoryRepository::load_fixture(&self.fixture)
            .with_context(|| format!("Failed to load fixture {}", self.fixture.display()))?;
        let config = match &self.config {
            Some(path) => TraversalConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => TraversalConfig::default(),
        };

        let mut manager = TraversalManager::new(Arc::new(repository), config);
        if let Some(batch_size) = self.batch_size {
            manager.set_batch_size_hint(batch_size);
        }
        Ok(manager)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Batch,
    Deferred,
    UpToDate,
    Unavailable,
}

#[derive(Serialize)]
struct BatchOutput {
    status: Status,
    items: Vec<ChangedItem>,
    checkpoint: Option<String>,
}

impl BatchOutput {
    fn drain(outcome: TraversalOutcome) -> Self {
        let (status, list) = match outcome {
            TraversalOutcome::UpToDate => (Status::UpToDate, None),
            TraversalOutcome::Unavailable => (Status::Unavailable, None),
            TraversalOutcome::Batch(list) => (Status::Batch, Some(list)),
            TraversalOutcome::Deferred(list) => (Status::Deferred, Some(list)),
        };
        let Some(mut list) = list else {
            return Self {
                status,
                items: Vec::new(),
                checkpoint: None,
            };
        };
        let items = list.by_ref().collect();
        Self {
            status,
            items,
            checkpoint: list.checkpoint(),
        }
    }
}

#[derive(Serialize, Default)]
struct ExhaustOutput {
    calls: usize,
    upserts: usize,
    deletes: usize,
    checkpoint: Option<String>,
    up_to_date: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    genealogist: Option<GenealogistStatistics>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Traverse { source, checkpoint } => {
            let mut manager = source.manager()?;
            let outcome = match checkpoint.as_deref() {
                Some(checkpoint) => manager.resume(checkpoint)?,
                None => manager.start()?,
            };
            print_json(&BatchOutput::drain(outcome))
        }
        Commands::Exhaust { source, max_calls } => {
            let mut manager = source.manager()?;
            let output = exhaust(&mut manager, max_calls)?;
            print_json(&output)
        }
        Commands::Schema => print_json(&schemars::schema_for!(TraversalConfig)),
    }
}

fn exhaust(manager: &mut TraversalManager, max_calls: usize) -> Result<ExhaustOutput> {
    let mut output = ExhaustOutput::default();
    let mut outcome = manager.start()?;

    while output.calls < max_calls {
        output.calls += 1;
        let batch = BatchOutput::drain(outcome);
        match batch.status {
            Status::UpToDate => {
                output.up_to_date = true;
                break;
            }
            Status::Unavailable => {
                log::warn!("Repository unavailable after {} calls", output.calls);
                break;
            }
            Status::Batch | Status::Deferred => {}
        }

        for item in &batch.items {
            match item {
                ChangedItem::Upsert(_) => output.upserts += 1,
                ChangedItem::Delete(_) => output.deletes += 1,
            }
        }
        if batch.checkpoint.is_some() {
            output.checkpoint = batch.checkpoint;
        }

        let resume_from = output.checkpoint.as_deref().unwrap_or(",,,");
        outcome = manager.resume(resume_from)?;
    }

    output.genealogist = manager.genealogist_statistics();
    Ok(output)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
