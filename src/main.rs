use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use exclusive_dispatch::config::{
    ExclusiveSourceConfig, MissingSourcePolicy, PolicyKind, SchedulerConfig, SimulationConfig,
    DEFAULT_EXCLUSIVE_SOURCE,
};
use exclusive_dispatch::scheduler::{Classifier, Collection};
use exclusive_dispatch::session::{LocalSession, SessionReport};
use exclusive_dispatch::shutdown::install_shutdown_handler;
use exclusive_dispatch::source::{load_collection, load_exclusive_set};

#[derive(Parser, Debug)]
#[command(name = "exclusive-dispatch")]
#[command(version)]
#[command(about = "Distribute test items across workers, running exclusive items alone")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a local session with simulated workers
    Simulate(SimulateArgs),

    /// Check an exclusive list against a collection without running anything
    Check {
        #[command(flatten)]
        source: SourceArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SourceArgs {
    /// File listing the collected item identifiers, one per line
    #[arg(long, short = 'c')]
    collection: PathBuf,

    /// File listing exclusive item identifiers, one per line
    #[arg(long, short = 'e', default_value = DEFAULT_EXCLUSIVE_SOURCE)]
    exclusive: PathBuf,

    /// Continue with no exclusive items if the exclusive list is missing
    #[arg(long)]
    allow_missing_exclusive: bool,

    /// Number of workers
    #[arg(long, short = 'n', default_value = "2")]
    workers: usize,

    /// Distribution policy
    #[arg(long, short = 'p', default_value = "load")]
    policy: Policy,
}

impl SourceArgs {
    fn exclusive_source(&self) -> ExclusiveSourceConfig {
        ExclusiveSourceConfig {
            path: self.exclusive.clone(),
            missing: if self.allow_missing_exclusive {
                MissingSourcePolicy::Empty
            } else {
                MissingSourcePolicy::Fail
            },
        }
    }
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Workers that ran exclusive items receive nothing else (scoped policies)
    #[arg(long)]
    dedicated_nodes: bool,

    /// Upper bound on a single refill batch
    #[arg(long)]
    max_chunk: Option<usize>,

    /// Shortest simulated item duration in milliseconds
    #[arg(long, default_value = "5")]
    min_item_ms: u64,

    /// Longest simulated item duration in milliseconds
    #[arg(long, default_value = "25")]
    max_item_ms: u64,

    /// Probability that a worker crashes while running an item
    #[arg(long, default_value = "0.0")]
    crash_rate: f64,

    /// How many crashed workers are replaced
    #[arg(long, default_value = "0")]
    respawn: usize,

    /// Seed for simulated durations and crashes
    #[arg(long)]
    seed: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Load,
    #[value(name = "loadfile")]
    LoadFile,
    #[value(name = "loadscope")]
    LoadScope,
}

impl From<Policy> for PolicyKind {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Load => PolicyKind::Load,
            Policy::LoadFile => PolicyKind::LoadFile,
            Policy::LoadScope => PolicyKind::LoadScope,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CheckOutput {
    policy: PolicyKind,
    workers: usize,
    items: usize,
    scopes: Option<usize>,
    exclusive_listed: usize,
    exclusive_present: Vec<String>,
    exclusive_missing: Vec<String>,
    sufficient_workers: bool,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = &args.source;
    let mut config = SchedulerConfig::new(source.workers, source.policy.into())
        .with_dedicated_nodes(args.dedicated_nodes);
    config.exclusive_source = source.exclusive_source();
    if let Some(max_chunk) = args.max_chunk {
        config = config.with_max_chunk(max_chunk);
    }

    let mut simulation = SimulationConfig::default()
        .with_item_ms(args.min_item_ms, args.max_item_ms)
        .with_crashes(args.crash_rate, args.respawn);
    if let Some(seed) = args.seed {
        simulation = simulation.with_seed(seed);
    }

    let exclusive = load_exclusive_set(&config.exclusive_source).await?;
    let enumeration = load_collection(&source.collection).await?;

    let cancel = install_shutdown_handler()?;
    let session = LocalSession::new(config, simulation, exclusive, enumeration);
    let report = session.run(cancel).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }

    if report.stalled {
        return Err("session stalled with items still pending".into());
    }
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!("Session {}", report.session_id);
    println!("{}", "=".repeat(48));
    println!("Policy:     {}", report.policy);
    if report.dedicated_nodes {
        println!("Dedicated:  yes");
    }
    println!("Items:      {}", report.total_items);
    println!("Completed:  {}", report.completed);
    println!("Crashed:    {}", report.crash_items.len());
    println!("Unfinished: {}", report.unfinished);
    println!("Duration:   {} ms", report.duration_ms());
    if report.respawned > 0 {
        println!("Respawned:  {}", report.respawned);
    }
    if report.cancelled {
        println!("Cancelled before completion");
    }
    println!();
    println!("{:<8} {:<8} {:<8} EXCLUSIVE", "WORKER", "ITEMS", "BATCHES");
    println!("{}", "-".repeat(48));
    for worker in &report.workers {
        let exclusive = if worker.exclusive.is_empty() {
            "-".to_string()
        } else {
            worker.exclusive.join(", ")
        };
        println!(
            "{:<8} {:<8} {:<8} {}",
            worker.worker,
            worker.items.len(),
            worker.batches,
            exclusive
        );
    }
    if !report.crash_items.is_empty() {
        println!();
        println!("Crash items:");
        for item in &report.crash_items {
            println!("  worker {}: {}", item.worker, item.id);
        }
    }
}

async fn run_check(
    source: SourceArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy: PolicyKind = source.policy.into();
    SchedulerConfig::new(source.workers, policy).validate()?;

    let exclusive = load_exclusive_set(&source.exclusive_source()).await?;
    let collection = Collection::new(load_collection(&source.collection).await?);

    let exclusive_present: Vec<String> = exclusive
        .indices_in(&collection)
        .into_iter()
        .map(|index| collection.label(index).to_string())
        .collect();
    let exclusive_missing: Vec<String> = exclusive
        .missing_from(&collection)
        .into_iter()
        .map(str::to_string)
        .collect();

    let scopes = match policy {
        PolicyKind::Load => None,
        PolicyKind::LoadFile | PolicyKind::LoadScope => {
            let classifier = Classifier::new(exclusive.clone());
            let distinct: HashSet<_> = collection.iter().map(|id| classifier.scope_of(id)).collect();
            Some(distinct.len())
        }
    };

    let result = CheckOutput {
        policy,
        workers: source.workers,
        items: collection.len(),
        scopes,
        exclusive_listed: exclusive.len(),
        sufficient_workers: exclusive_present.len() < source.workers,
        exclusive_present,
        exclusive_missing,
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => {
            println!("Policy:   {}", result.policy);
            println!("Workers:  {}", result.workers);
            println!("Items:    {}", result.items);
            if let Some(scopes) = result.scopes {
                println!("Scopes:   {}", scopes);
            }
            println!(
                "Exclusive: {} listed, {} collected",
                result.exclusive_listed,
                result.exclusive_present.len()
            );
            for id in &result.exclusive_present {
                println!("  [+] {}", id);
            }
            for id in &result.exclusive_missing {
                println!("  [-] {} (not collected)", id);
            }
        }
    }

    if !result.sufficient_workers {
        return Err(format!(
            "{} exclusive items need more than {} workers",
            result.exclusive_present.len(),
            result.workers
        )
        .into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Simulate(simulate_args) => {
            run_simulate(simulate_args).await?;
        }
        Commands::Check { source, output } => {
            run_check(source, output).await?;
        }
    }

    Ok(())
}
