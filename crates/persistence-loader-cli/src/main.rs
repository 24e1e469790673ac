//! persistence-loader CLI - schema-driven relational storage for directory data.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use persistence_loader::{
    load_schema, BackendAdapter, BackendCatalog, Config, Loader, LoaderError, Phases, RunReport,
    ServerVersion, TypeResolver,
};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Exit code for a run that completed with per-item failures.
const EXIT_SWEEP_FAILURES: u8 = 4;

#[derive(Parser)]
#[command(name = "persistence-loader")]
#[command(about = "Schema-driven relational storage mapping and migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "loader.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage, then apply column migrations
    Run,

    /// Create missing tables and indexes and import initial data
    Init,

    /// Apply column migrations only
    Migrate,

    /// Print the DDL the loader would issue against an empty database
    Plan,

    /// Print the column type an attribute resolves to
    Resolve {
        /// Attribute name
        attribute: String,

        /// Table the column belongs to
        #[arg(long)]
        table: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, LoaderError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let backends = BackendCatalog::with_builtins();

    match cli.command {
        Commands::Run => execute(&backends, config, Phases::ALL, cli.output_json).await,
        Commands::Init => execute(&backends, config, Phases::INITIALIZE, cli.output_json).await,
        Commands::Migrate => execute(&backends, config, Phases::MIGRATE, cli.output_json).await,
        Commands::Plan => {
            plan(&backends, config, cli.output_json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { attribute, table } => {
            let dialect = backends.require_dialect(config.backend.kind()?)?;
            let (catalog, policies) = load_schema(&config)?;
            let resolver = TypeResolver::new(&catalog, &policies.types);
            println!(
                "{}",
                resolver.resolve(&attribute, dialect.as_ref(), table.as_deref())
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn execute(
    backends: &BackendCatalog,
    config: Config,
    phases: Phases,
    output_json: bool,
) -> Result<ExitCode, LoaderError> {
    let adapter = backends.connect(&config.backend).await?;
    let loader = Loader::new(config, adapter.clone())?;
    let result = loader.run(phases).await;
    adapter.close().await;

    let report = result?;
    print_report(&report, output_json)?;
    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_SWEEP_FAILURES))
    }
}

/// Render DDL against an in-memory backend of the configured dialect.
async fn plan(
    backends: &BackendCatalog,
    config: Config,
    output_json: bool,
) -> Result<(), LoaderError> {
    let version = config
        .backend
        .server_version
        .as_deref()
        .map(ServerVersion::parse)
        .unwrap_or_else(ServerVersion::latest);
    let memory = backends.memory(config.backend.kind()?, version)?;
    let adapter: Arc<dyn BackendAdapter> = memory.clone();

    let loader = Loader::new(config, adapter)?;
    loader.create_layout().await?;
    let statements = memory.statements().await;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&statements)?);
    } else {
        for statement in statements {
            println!("{};", statement);
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, output_json: bool) -> Result<(), LoaderError> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over --verbosity when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
