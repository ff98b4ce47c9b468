use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use storecopy::compare::compare_stores;
use storecopy::config::{CopyConfig, CopyFilters};
use storecopy::pipeline::run_copy;
use storecopy::store::{open_source, StoreFormat};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "storecopy")]
#[command(about = "Copy a graph store into a new store, filtering and remapping on the way")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a source store into a new target store
    Copy(CopyArgs),
    /// Compare node, label, relationship and property counts of two stores
    Compare(CompareArgs),
}

#[derive(Args)]
struct FilterArgs {
    /// Relationship types to drop (comma-separated, case-insensitive)
    #[arg(long, value_delimiter = ',')]
    ignore_rel_types: Vec<String>,

    /// Property keys to drop from nodes and relationships
    #[arg(long, value_delimiter = ',')]
    ignore_properties: Vec<String>,

    /// Labels to strip from copied nodes
    #[arg(long, value_delimiter = ',')]
    ignore_labels: Vec<String>,

    /// Nodes carrying any of these labels are not copied
    #[arg(long, value_delimiter = ',')]
    delete_labels: Vec<String>,
}

#[derive(Args)]
struct CopyArgs {
    /// Source store directory
    source: Option<PathBuf>,

    /// Target store directory (must not exist unless --overwrite)
    target: Option<PathBuf>,

    #[command(flatten)]
    filters: FilterArgs,

    /// TOML configuration file; command-line values take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep source node ids in the target (false compacts them)
    #[arg(long)]
    keep_node_ids: Option<bool>,

    /// Ids per shard
    #[arg(long)]
    batch_size: Option<u64>,

    /// Capacity of the queue feeding the bulk loader
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Scan worker threads (default: half the cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Shard tasks in flight before the dispatcher waits
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Directory for store-copy.log (default: target directory)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Snapshot revision written to the target
    #[arg(long)]
    target_format: Option<StoreFormat>,

    /// Write the source-to-target node id map to <target>/id-map.bin
    #[arg(long)]
    persist_id_map: bool,

    /// Replace an existing target directory
    #[arg(long)]
    overwrite: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct CompareArgs {
    /// Source store directory
    source: PathBuf,

    /// Target store directory
    target: PathBuf,

    #[command(flatten)]
    filters: FilterArgs,

    /// Ids per counting shard
    #[arg(
        long,
        default_value_t = storecopy::config::BATCH_SIZE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    batch_size: u64,

    /// Skip the per-node property comparison (use when node ids were compacted)
    #[arg(long)]
    counts_only: bool,
}

/// Layers command-line values over the configuration file.
fn build_config(args: &CopyArgs) -> Result<CopyConfig> {
    let mut config = match &args.config {
        Some(path) => CopyConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => CopyConfig::default(),
    };

    if let Some(source) = &args.source {
        config.source_dir = Some(source.clone());
    }
    if let Some(target) = &args.target {
        config.target_dir = Some(target.clone());
    }
    let f = &args.filters;
    for (names, slot) in [
        (&f.ignore_rel_types, &mut config.rel_types_to_ignore),
        (&f.ignore_properties, &mut config.properties_to_ignore),
        (&f.ignore_labels, &mut config.labels_to_ignore),
        (&f.delete_labels, &mut config.labels_to_delete),
    ] {
        if !names.is_empty() {
            *slot = names.clone();
        }
    }
    if let Some(keep) = args.keep_node_ids {
        config.keep_node_ids = keep;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.max_in_flight = max_in_flight;
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    if let Some(format) = args.target_format {
        config.target_format = format;
    }
    config.persist_id_map |= args.persist_id_map;
    config.overwrite |= args.overwrite;
    Ok(config)
}

fn filters_from(args: &FilterArgs) -> CopyFilters {
    CopyConfig {
        rel_types_to_ignore: args.ignore_rel_types.clone(),
        properties_to_ignore: args.ignore_properties.clone(),
        labels_to_ignore: args.ignore_labels.clone(),
        labels_to_delete: args.delete_labels.clone(),
        ..CopyConfig::default()
    }
    .filters()
}

fn run_copy_command(args: CopyArgs) -> Result<()> {
    let config = build_config(&args)?;
    println!(
        concat!(
            "Copying from {:?} to {:?} ignoring rel-types {:?} ignoring properties {:?} ",
            "ignoring labels {:?} removing nodes with labels {:?} keep node ids {}"
        ),
        config.source_dir.as_deref().unwrap_or(Path::new("")),
        config.target_dir.as_deref().unwrap_or(Path::new("")),
        config.rel_types_to_ignore,
        config.properties_to_ignore,
        config.labels_to_ignore,
        config.labels_to_delete,
        config.keep_node_ids,
    );

    let report = run_copy(&config, !args.no_progress)?;

    if let Some(path) = &args.report {
        report.write_json(path)?;
        info!(path = ?path, "Report written");
    }

    println!();
    println!("=== Summary ===");
    println!("Nodes loaded:         {}", report.nodes.loaded);
    println!("Relationships loaded: {}", report.relationships.loaded);
    println!("Id map entries:       {}", report.id_map_entries);
    println!("Error log entries:    {}", report.error_log_entries);
    println!("Index files copied:   {}", report.index_files_copied);
    println!("Total time:           {:.2}s", report.elapsed_secs);
    Ok(())
}

fn run_compare_command(args: CompareArgs) -> Result<()> {
    let start = Instant::now();
    if !args.target.exists() {
        bail!("Target directory does not exist: {:?}", args.target);
    }
    if !args.source.exists() {
        bail!("Source store does not exist: {:?}", args.source);
    }
    let source =
        open_source(&args.source).with_context(|| format!("Failed to open {:?}", args.source))?;
    let target =
        open_source(&args.target).with_context(|| format!("Failed to open {:?}", args.target))?;

    let comparison = compare_stores(
        source.as_ref(),
        target.as_ref(),
        &filters_from(&args.filters),
        args.batch_size,
        !args.counts_only,
    )?;

    println!("Source: {:?}", comparison.source);
    println!("Target: {:?}", comparison.target);
    for difference in &comparison.differences {
        eprintln!("  {difference}");
    }
    println!("Comparing took {:.2}s", start.elapsed().as_secs_f64());

    if !comparison.is_match() {
        bail!(
            "Stores differ: {} differences, {} node property mismatches",
            comparison.differences.len(),
            comparison.property_mismatches
        );
    }
    println!("Stores match");
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
        Commands::Copy(args) => run_copy_command(args),
        Commands::Compare(args) => run_compare_command(args),
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
