use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use afdata::config::{ConfigLoader, validate_data_dir};
use afdata::domain::SourceKind;
use afdata::error::AfDataError;
use afdata::manager::{DataManager, ProgressSink};
use afdata::output::{JsonOutput, OutputMode, TableOutput};
use afdata::registry::SourceRegistry;
use afdata::transfer::SystemTransfer;

#[derive(Parser)]
#[command(name = "afdata")]
#[command(about = "Download, decompress and track versioned AlphaFold data bundles")]
#[command(version, author)]
struct Cli {
    /// Install directory holding compressed/, uncompressed/ and current/
    #[arg(long, global = true, env = "ALPHAFOLD_DATA")]
    data_dir: Option<Utf8PathBuf>,

    /// Config file (default: ./afdata.json, then the user config directory)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Sources processed concurrently
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Restrict the command to these sources
    #[arg(long = "source", global = true, value_enum)]
    sources: Vec<SourceKind>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download compressed files")]
    Download(ForceArgs),
    #[command(about = "Decompress files")]
    Decompress(ForceArgs),
    #[command(about = "Clean up compressed data")]
    Prune,
    #[command(about = "Download and decompress")]
    Update,
    #[command(about = "Link configured versions under current/")]
    Link,
    #[command(about = "Summarize installation status")]
    Status,
}

#[derive(Args)]
struct ForceArgs {
    /// Redo the work even if the artifact is already available
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(report) => {
            eprintln!("{report:?}");
            let code = report
                .downcast_ref::<AfDataError>()
                .map_or(1, AfDataError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run() -> miette::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Table
    };

    let root = validate_data_dir(cli.data_dir.as_deref())?;
    tracing::debug!(data_dir = %root, "resolved data directory");

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let registry = SourceRegistry::from_config(&config)?.restricted_to(&cli.sources)?;
    let jobs = cli.jobs.unwrap_or(config.jobs);

    let backend = SystemTransfer::detect()?;
    tracing::debug!(tools = ?backend.tool_info(), "transfer backend ready");
    let manager = DataManager::new(root, registry, backend).with_jobs(jobs);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Table => &TableOutput,
    };

    let report = match cli.command {
        Commands::Download(args) => manager.download_all(args.force, sink),
        Commands::Decompress(args) => manager.decompress_all(args.force, sink),
        Commands::Prune => manager.prune_all(sink),
        Commands::Link => manager.link(sink),
        Commands::Update => {
            let report = manager.update(sink);
            match output_mode {
                OutputMode::Json => JsonOutput::print_update(&report).into_diagnostic()?,
                OutputMode::Table => TableOutput::print_update(&report).into_diagnostic()?,
            }
            return Ok(report.success());
        }
        Commands::Status => {
            let report = manager.status();
            match output_mode {
                OutputMode::Json => JsonOutput::print_status(&report).into_diagnostic()?,
                OutputMode::Table => TableOutput::print_status(&report).into_diagnostic()?,
            }
            return Ok(true);
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_batch(&report).into_diagnostic()?,
        OutputMode::Table => TableOutput::print_batch(&report).into_diagnostic()?,
    }
    Ok(report.success())
}
