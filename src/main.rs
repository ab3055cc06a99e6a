use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use podshape::config::FragmenterConfig;
use podshape::fragment::Fragmenter;
use podshape::parser::StatementReader;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "podshape")]
#[command(about = "Summarize RDF datasets into derived-resource query templates")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a dump and write derived resources for every dataset
    Fragment(FragmentArgs),
    /// Load and validate a configuration file
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
struct FragmentArgs {
    /// Path to the N-Triples / N-Quads input (.nt, .nq, optionally .bz2)
    #[arg(short, long)]
    input: String,

    /// Path to the JSON run configuration
    #[arg(short, long)]
    config: String,

    /// Maximum number of simultaneously open output files
    #[arg(long)]
    max_open_writers: Option<usize>,

    /// Number of tokio worker threads used for writing
    #[arg(long, default_value_t = 4)]
    worker_threads: usize,
}

#[derive(Args)]
struct CheckConfigArgs {
    /// Path to the JSON run configuration
    #[arg(short, long)]
    config: String,
}

/// Writer runtime. File I/O goes through `tokio::fs`, which needs no I/O driver.
fn build_runtime(worker_threads: usize) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("podshape-writer")
        .enable_time()
        .build()
        .context("Failed to build tokio runtime")
}

fn run_fragment(args: FragmentArgs) -> Result<()> {
    let mut config = FragmenterConfig::from_path(&args.config)?;
    if let Some(bound) = args.max_open_writers {
        config.max_open_writers = bound;
    }

    let mut fragmenter = Fragmenter::new(&config)?;
    let stats = fragmenter.stats();
    let reader = StatementReader::open(&args.input)
        .with_context(|| format!("Failed to open input: {}", args.input))?;

    let rt = build_runtime(args.worker_threads)?;

    info!(input = %args.input, mode = ?config.mode, "Starting fragmentation");
    let start = Instant::now();
    rt.block_on(fragmenter.fragment(reader))?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Total time:          {:.2}s", duration.as_secs_f64());
    println!();
    println!("Statements read:     {}", stats.read());
    println!("Statements routed:   {}", stats.routed());
    println!("Excluded:            {}", stats.excluded());
    println!("Unrouted:            {}", stats.unrouted());
    println!("Blank deferred:      {}", stats.deferred());
    println!("Blank attributed:    {}", stats.attributed());
    println!("Blank dropped:       {}", stats.dropped());
    println!("Datasets flushed:    {}", stats.flushed());
    println!("Files written:       {}", stats.files());

    Ok(())
}

fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = FragmenterConfig::from_path(&args.config)?;
    // builds every regex and generator without touching the filesystem
    Fragmenter::new(&config)?;
    println!(
        "{}: ok (mode {:?}, {} dataset pattern(s), {} path rule(s))",
        args.config,
        config.mode,
        config.dataset_patterns.len(),
        config.iri_to_path.len()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Fragment(args) => run_fragment(args),
        Commands::CheckConfig(args) => run_check_config(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
