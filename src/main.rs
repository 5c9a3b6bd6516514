// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use dfp_bank_benchmark::{
    discovery, export, get_unmapped_lines, replace_run, run_pipeline, setup_database,
    unmapped, BenchmarkConfig, DirectorySource, StatementType,
};

#[derive(Parser)]
#[command(name = "dfp-bank-benchmark", version, about = "CVM DFP bank benchmark")]
struct Cli {
    /// JSON configuration file (absent fields keep their defaults)
    #[arg(long, global = true, env = "DFP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline, write CSV artifacts and persist the run
    Extract,
    /// Scan unmapped lines of the persisted run for candidate labels
    Discover {
        #[arg(long, default_value = "DRE")]
        statement: String,
        #[arg(long, default_value_t = discovery::DEFAULT_TOP_N)]
        top: usize,
    },
    /// Terminal dashboard over the persisted run (default)
    Ui,
    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Ui) {
        Command::Extract => run_extract(&config)?,
        Command::Discover { statement, top } => run_discover(&config, &statement, top)?,
        Command::Ui => run_ui_mode(&config)?,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BenchmarkConfig> {
    match path {
        Some(path) => BenchmarkConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(BenchmarkConfig::default()),
    }
}

fn run_extract(config: &BenchmarkConfig) -> Result<()> {
    println!("🏦 DFP Bank Benchmark - Extraction");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Run pipeline
    println!("\n📂 Reading {} ...", config.data_dir.display());
    let source = DirectorySource::new(&config.data_dir);
    let output = run_pipeline(config, &source).context("Pipeline run failed")?;
    println!("✓ Run {}", output.run_id);

    // 2. CSV artifacts
    println!("\n💾 Writing artifacts...");
    let paths = export::write_artifacts(&config.output_dir, &output)
        .with_context(|| format!("Failed to write artifacts to {}", config.output_dir.display()))?;
    for path in &paths {
        println!("✓ {}", path.display());
    }

    // 3. Persist run
    println!("\n🔧 Persisting to {} ...", config.database_path.display());
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    setup_database(&conn)?;
    replace_run(&mut conn, &output)?;
    println!("✓ Database updated (WAL mode)");

    // 4. Summary
    let succeeded = output.succeeded_years();
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Years OK: {:?}", succeeded);
    for failure in &output.failures {
        let statement = failure.statement.map(|s| s.code()).unwrap_or("-");
        println!("✗ Year {} failed ({} {}): {}", failure.year, failure.kind, statement, failure.reason);
    }
    for usage in output.unmatched_metrics() {
        println!("⚠️  {} {} ({}): no candidate label matched", usage.year, usage.metric, usage.statement);
    }
    for ((year, statement), count) in unmapped::summarize(&output.unmapped) {
        println!("🔍 {} {}: {} unmapped lines", year, statement, count);
    }
    for line in &output.shadowed {
        println!(
            "⚠️  {} {} {}: '{}' shadowed by '{}'",
            line.year, line.metric, line.company, line.label, line.label_used
        );
    }
    println!("✓ Reconciled rows: {}", output.records.len());

    if succeeded.is_empty() {
        anyhow::bail!("No year could be processed");
    }

    println!("🎉 Extraction complete!");
    Ok(())
}

fn run_discover(config: &BenchmarkConfig, statement: &str, top: usize) -> Result<()> {
    let statement = StatementType::from_code(statement)
        .with_context(|| format!("Unknown statement type '{}' (expected BPA, BPP or DRE)", statement))?;

    let conn = open_existing(&config.database_path)?;
    let unmapped = get_unmapped_lines(&conn)?;

    let report = discovery::discover_candidates(&unmapped, statement, &discovery::DEFAULT_PATTERNS, top);

    println!("\nTotal {} ({}) unmapped: {}", statement, statement.name(), report.scanned);
    println!("Total pattern hits: {}", report.hits.len());
    println!("\nTop candidate labels (freq):");
    for entry in &report.top {
        println!("{:>6}  {}", entry.freq, entry.label);
    }

    let paths = discovery::write_report(&config.output_dir, &report)?;
    println!("\nFiles saved:");
    for path in &paths {
        println!(" - {}", path.display());
    }

    Ok(())
}

fn open_existing(path: &Path) -> Result<Connection> {
    if !path.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: dfp-bank-benchmark extract");
        eprintln!("   to build the dataset first.");
        std::process::exit(1);
    }
    Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &BenchmarkConfig) -> Result<()> {
    use dfp_bank_benchmark::{get_mapping_usage, get_records};

    println!("🖥️  Loading DFP Bank Benchmark UI...\n");

    let conn = open_existing(&config.database_path)?;

    println!("📊 Loading persisted run...");
    let records = get_records(&conn)?;
    let usage = get_mapping_usage(&conn)?;
    let unmapped = get_unmapped_lines(&conn)?;

    println!("✓ Loaded {} records\n", records.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(records, usage, unmapped);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &BenchmarkConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin benchmark-server --features server");
    std::process::exit(1);
}
