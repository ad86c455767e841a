//! pg-schema-copy CLI - dependency-ordered PostgreSQL schema copy.

mod confirm;

use clap::{Parser, Subcommand};
use pg_schema_copy::{
    Config, ConstraintStrategy, CopyError, CopyReport, DatabaseConfig, FailurePolicy,
    PgCopyOrchestrator, PlannedCopy,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-schema-copy")]
#[command(about = "Copy every table of a PostgreSQL schema into another database in dependency order")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Source connection URL (with --target-url, no config file is needed)
    #[arg(long, global = true, env = "SOURCE_DATABASE_URL", hide_env_values = true)]
    source_url: Option<String>,

    /// Target connection URL
    #[arg(long, global = true, env = "TARGET_DATABASE_URL", hide_env_values = true)]
    target_url: Option<String>,

    /// Schema to copy, on both sides
    #[arg(long, global = true)]
    schema: Option<String>,

    /// Override source schema
    #[arg(long, global = true)]
    source_schema: Option<String>,

    /// Override target schema
    #[arg(long, global = true)]
    target_schema: Option<String>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds after SIGINT/SIGTERM before reporting that shutdown is stalled
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy all tables from source to target
    Run {
        /// Show the copy plan without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Rows per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Constraint suspension: session_replication_role or trigger_toggle
        #[arg(long)]
        strategy: Option<ConstraintStrategy>,

        /// Stop after the first failed table
        #[arg(long)]
        abort_on_failure: bool,

        /// Exit with an error when any table fails
        #[arg(long)]
        fail_on_partial: bool,

        /// Leave target sequences untouched
        #[arg(long)]
        skip_sequences: bool,
    },

    /// Show the dependency-ordered copy plan
    Plan,

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CopyError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            dry_run,
            yes,
            chunk_size,
            strategy,
            abort_on_failure,
            fail_on_partial,
            skip_sequences,
        } => {
            if let Some(size) = chunk_size {
                config.copy.chunk_size = Some(size);
            }
            if let Some(strategy) = strategy {
                config.copy.constraint_strategy = strategy;
            }
            if abort_on_failure {
                config.copy.failure_policy = FailurePolicy::Abort;
            }
            if fail_on_partial {
                config.copy.fail_on_partial = true;
            }
            if skip_sequences {
                config.copy.resync_sequences = false;
            }
            config.validate()?;

            let orchestrator = PgCopyOrchestrator::connect(&config).await?;

            if dry_run {
                let planned = orchestrator.plan().await?;
                print_plan(&planned, cli.output_json)?;
                if !cli.output_json {
                    println!("\nDry run: no data copied.");
                }
                return Ok(());
            }

            if !yes {
                let planned = orchestrator.plan().await?;
                let prompt = format!(
                    "Replace all rows of {} tables in {}?",
                    planned.plan.len(),
                    config.target.display_name()
                );
                if !confirm::confirm_destructive(&prompt)? {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let cancel_token = setup_signal_handler(cli.shutdown_timeout);
            let report = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            report.check(config.copy.fail_on_partial)?;
        }

        Commands::Plan => {
            let orchestrator = PgCopyOrchestrator::connect(&config).await?;
            let planned = orchestrator.plan().await?;
            print_plan(&planned, cli.output_json)?;
        }

        Commands::Validate => {
            let orchestrator = PgCopyOrchestrator::connect(&config).await?;
            let result = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Row count validation:");
                for check in &result.tables {
                    let target = check
                        .target_rows
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "n/a".to_string());
                    println!(
                        "  {} {}: source={} target={}",
                        if check.matches() { "OK  " } else { "DIFF" },
                        check.table,
                        check.source_rows,
                        target
                    );
                }
            }

            if !result.all_match() {
                return Err(CopyError::Validation(format!(
                    "row counts differ for: {}",
                    result.mismatched().join(", ")
                )));
            }
            if !cli.output_json {
                println!("Validation completed successfully");
            }
        }

        Commands::HealthCheck => {
            let orchestrator = PgCopyOrchestrator::connect(&config).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(CopyError::connection("health check failed", "health-check"));
            }
        }
    }

    Ok(())
}

/// Build the configuration from the config file and command-line overrides.
///
/// When both URLs are given the config file is not read.
fn load_config(cli: &Cli) -> Result<Config, CopyError> {
    let mut config = match (&cli.source_url, &cli.target_url) {
        (Some(source), Some(target)) => {
            info!("Using connection URLs from the command line");
            Config::from_urls(source.clone(), target.clone())
        }
        _ => {
            let mut config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            if let Some(url) = &cli.source_url {
                config.source = with_url(&config.source, url);
            }
            if let Some(url) = &cli.target_url {
                config.target = with_url(&config.target, url);
            }
            config
        }
    };

    if let Some(schema) = &cli.schema {
        config.source.schema = schema.clone();
        config.target.schema = schema.clone();
    }
    if let Some(schema) = &cli.source_schema {
        config.source.schema = schema.clone();
    }
    if let Some(schema) = &cli.target_schema {
        config.target.schema = schema.clone();
    }

    config.validate()?;
    Ok(config)
}

fn with_url(base: &DatabaseConfig, url: &str) -> DatabaseConfig {
    let mut db = DatabaseConfig::from_url(url);
    db.schema = base.schema.clone();
    db.ssl_mode = base.ssl_mode.clone();
    db
}

fn print_plan(planned: &PlannedCopy, json: bool) -> Result<(), CopyError> {
    if json {
        println!("{}", serde_json::to_string_pretty(planned)?);
        return Ok(());
    }

    println!(
        "Copy plan for schema {} ({} tables):",
        planned.catalog.schema(),
        planned.plan.len()
    );
    for (i, table) in planned.plan.iter().enumerate() {
        let note = if planned.plan.unresolved.iter().any(|t| t == table) {
            "  (circular dependency)"
        } else {
            ""
        };
        let columns = planned
            .catalog
            .list_columns(table)
            .map(|c| c.len())
            .unwrap_or(0);
        println!("  {:>3}. {} [{} columns]{}", i + 1, table, columns, note);
    }
    for table in planned.catalog.skipped() {
        println!("    -  {} (skipped: no copyable columns)", table);
    }
    Ok(())
}

fn print_report(report: &CopyReport) {
    let headline = match report.status {
        pg_schema_copy::RunStatus::Completed => "Copy completed!",
        pg_schema_copy::RunStatus::CompletedWithFailures => "Copy completed with failures.",
        pg_schema_copy::RunStatus::Aborted => "Copy aborted.",
        pg_schema_copy::RunStatus::Cancelled => "Copy cancelled.",
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {}/{} ({} skipped)",
        report.tables_succeeded, report.tables_total, report.tables_skipped
    );
    println!("  Rows: {}", report.rows_copied);
    println!(
        "  Sequences: {} resynchronized, {} failed",
        report.sequences.resynced.len(),
        report.sequences.failed.len()
    );
    if !report.unresolved.is_empty() {
        println!("  Circular dependencies: {:?}", report.unresolved);
    }
    if !report.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", report.failed_tables);
    }
    if !report.constraints_restored {
        println!("  WARNING: constraint enforcement was not fully restored on the target");
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json leaves stdout parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// The running statement is cancelled on the server, its table is rolled
/// back, constraints are restored and the process exits with the cancelled
/// code. The process never exits on its own while constraints may still be
/// suspended; after `shutdown_timeout` seconds it only reports the stall.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
            report_stalled_shutdown(shutdown_timeout).await;
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
        report_stalled_shutdown(shutdown_timeout).await;
    });

    cancel_token
}

async fn report_stalled_shutdown(shutdown_timeout: u64) {
    tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
    error!(
        "Shutdown still in progress after {}s; waiting for rollback and constraint restore on the target",
        shutdown_timeout
    );
}
