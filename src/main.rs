use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cnpj_etl::config::to_toml;
use cnpj_etl::{
    export_only, load_config, lookup, EtlError, HttpFetcher, LoadMode, Pipeline, PipelineConfig,
    CONSTRUCTION_SERVICES_V1,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CNPJ_ETL_LOG";
const DEFAULT_LOG: &str = "info";

#[derive(Parser)]
#[command(name = "cnpj-etl", version, about = "CNPJ open-data registry → SQLite → filtered export")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "CNPJ_ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire, normalize, load, index and export (full rebuild)
    Run {
        /// materialized | streaming
        #[arg(long)]
        mode: Option<LoadMode>,
    },
    /// Re-run the projection against the existing store
    Export,
    /// Show the projection rows of one base identifier
    Lookup { cnpj_basico: String },
    /// Print the effective configuration as TOML
    Config,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {:#}", e);
        let exit_code = e
            .downcast_ref::<EtlError>()
            .map(EtlError::exit_code)
            .unwrap_or(1);
        process::exit(exit_code);
    }
}

/// Filter from CNPJ_ETL_LOG only (RUST_LOG is not consulted), default info
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG))
}

fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    // --data-dir re-roots every path, other settings stay
    if let Some(dir) = &cli.data_dir {
        let rooted = PipelineConfig::with_data_dir(dir);
        config.data_dir = rooted.data_dir;
        config.database = rooted.database;
        config.export_path = rooted.export_path;
        config.report_path = rooted.report_path;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = resolve_config(&cli)?;

    match cli.command {
        Commands::Run { mode } => {
            if let Some(mode) = mode {
                config.load_mode = mode;
            }
            run_pipeline(config)
        }
        Commands::Export => {
            println!("📤 Exporting {}", CONSTRUCTION_SERVICES_V1.label());
            let summary = export_only(&config)?;
            println!("✓ {} rows → {}", summary.rows, summary.path.display());
            println!("  sha256 {}", summary.sha256);
            Ok(())
        }
        Commands::Lookup { cnpj_basico } => {
            let rows = lookup(&config, &cnpj_basico)?;
            if rows.is_empty() {
                println!("No projection rows for {}", cnpj_basico);
            }
            for row in rows {
                println!("{}", serde_json::to_string_pretty(&row)?);
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", to_toml(&config)?);
            Ok(())
        }
    }
}

fn run_pipeline(config: PipelineConfig) -> Result<()> {
    println!("🗄️  CNPJ ETL - ZIP → SQLite → {}", CONSTRUCTION_SERVICES_V1.label());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let fetcher = HttpFetcher::new(&config.http)?;
    let report_path = config.report_path.clone();
    let pipeline = Pipeline::new(config, fetcher)?;
    let report = pipeline.run().context("pipeline run failed")?;

    println!("\n📥 Acquisition");
    for counts in &report.acquisition {
        println!(
            "✓ {}: {} archives ({} fetched, {} already present, {} ignored)",
            counts.table, counts.archives, counts.fetched, counts.skipped, counts.ignored
        );
    }

    println!("\n💾 Load ({:?})", report.load_mode);
    for summary in [&report.load.entities, &report.load.establishments] {
        println!(
            "✓ {}: {} rows from {} files in {} batches",
            summary.table, summary.rows, summary.files, summary.batches
        );
    }

    println!("\n🔍 Integrity");
    if report.integrity.is_clean() {
        println!("✓ Every establishment has an entity row");
    } else {
        println!("⚠️  {} orphan establishment rows", report.integrity.orphans);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "🎉 Exported {} rows → {}",
        report.export.rows,
        report.export.path.display()
    );
    println!("   sha256 {}", report.export.sha256);
    println!("   report {}", report_path.display());
    Ok(())
}
