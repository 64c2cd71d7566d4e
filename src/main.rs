//! testwire CLI - ship test results to the reporting service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testwire::ci;
use testwire::config::{self, CONFIG_TEMPLATE, Config};
use testwire::model::CompletedTest;
use testwire::report::{CloudReporter, ConsoleReporter, DeliveryStats, MultiReporter, Reporter};
use testwire::transport::TransmitError;
use testwire::upload::UploadProgress;

#[derive(Parser)]
#[command(name = "testwire")]
#[command(about = "Ship test results to the reporting service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testwire.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a results file (JSON array or JSON lines of completed tests)
    Send {
        /// Results file
        results: PathBuf,

        /// Override the source label
        #[arg(long)]
        source: Option<String>,

        /// Don't upload artifacts
        #[arg(long)]
        no_upload: bool,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Send {
            results,
            source,
            no_upload,
        } => send_results(&cli.config, &results, source, no_upload, cli.verbose).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { force } => init_config(&cli.config, force),
    }
}

/// Loads the config file, or defaults plus environment if it doesn't exist.
fn load(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let config = config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        info!("Loaded configuration from {}", config_path.display());
        return Ok(config);
    }

    info!(
        "{} not found, using defaults and environment",
        config_path.display()
    );
    let mut config = Config::default();
    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Parses a results file: a JSON array, or one JSON object per line.
fn parse_results(content: &str) -> Result<Vec<CompletedTest>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Failed to parse results array");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Failed to parse result on line {}", i + 1))
        })
        .collect()
}

async fn send_results(
    config_path: &Path,
    results_path: &Path,
    source: Option<String>,
    no_upload: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(source) = source {
        config.reporter.source = source;
    }
    if no_upload {
        config.upload.enabled = false;
    }

    let content = std::fs::read_to_string(results_path)
        .with_context(|| format!("Failed to read results from {}", results_path.display()))?;
    let tests = parse_results(&content)?;
    info!("Read {} results from {}", tests.len(), results_path.display());

    let upload_bar = indicatif::ProgressBar::new(100);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("uploading artifacts [{bar:40.cyan/blue}] {pos}%")
    {
        upload_bar.set_style(style.progress_chars("#>-"));
    }
    let bar = upload_bar.clone();

    let cloud = Arc::new(
        CloudReporter::new(&config)
            .context("Invalid configuration")?
            .with_upload_progress(Arc::new(move |p: UploadProgress| {
                bar.set_position(u64::from(p.percent));
            }))
            .with_on_error(Arc::new(|e: &TransmitError| {
                warn!(
                    correlation_id = %e.correlation_id,
                    records = e.failed_records,
                    "delivery failed: {}",
                    e
                );
            })),
    );
    let reporter = MultiReporter::new()
        .with_reporter(ConsoleReporter::new(verbose))
        .with_reporter(Arc::clone(&cloud));

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    let metadata = ci::resolve_run_metadata(&config.reporter.source);
    reporter.on_run_start(&metadata).await;

    for test in &tests {
        if token.is_cancelled() {
            break;
        }
        reporter.on_test_complete(test).await;
    }

    if token.is_cancelled() {
        warn!("Interrupted, sending buffered results once");
        cloud.shutdown().await;
    } else {
        reporter.on_run_end().await;
    }
    upload_bar.finish_and_clear();

    let stats = cloud.stats();
    let pending = cloud.pending();
    print_delivery_summary(&stats, pending);

    let undelivered = pending as u64 + stats.records_dropped;
    if undelivered > 0 {
        bail!("{} results were not delivered", undelivered);
    }
    Ok(())
}

fn print_delivery_summary(stats: &DeliveryStats, pending: usize) {
    println!();
    println!("Delivery:");
    println!(
        "  Sent:      {} records in {} batches",
        console::style(stats.records_sent).green(),
        stats.batches_sent
    );
    if stats.batches_failed > 0 {
        println!(
            "  Failed:    {} batches",
            console::style(stats.batches_failed).red()
        );
    }
    if stats.records_dropped > 0 {
        println!(
            "  Dropped:   {} records",
            console::style(stats.records_dropped).red().bold()
        );
    }
    if pending > 0 {
        println!("  Pending:   {} records", console::style(pending).yellow());
    }
    if stats.artifacts_uploaded + stats.artifacts_failed > 0 {
        println!(
            "  Artifacts: {} uploaded, {} failed",
            console::style(stats.artifacts_uploaded).green(),
            console::style(stats.artifacts_failed).red()
        );
    }
    println!("  Bytes:     {}", stats.bytes_sent);
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    config.validate().context("Invalid configuration")?;

    println!("Configuration is valid");
    println!("  Endpoint:    {}", config.reporter.endpoint);
    println!("  Batch size:  {}", config.reporter.batch_size);
    println!("  Max retries: {}", config.reporter.max_retries);
    println!("  Buffer size: {}", config.reporter.max_buffer_size);
    println!(
        "  Uploads:     {}",
        if config.upload.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Remove it first, edit it manually, or pass --force.",
            path.display()
        );
    }

    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Set TESTWIRE_API_KEY (or reporter.api_key), then run:");
    println!("  testwire send results.json");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testwire::model::TestOutcome;

    #[test]
    fn test_parse_results_array() {
        let tests = parse_results(
            r#"[
                {"id": "a", "title": "one", "outcome": "passed"},
                {"id": "b", "title": "two", "outcome": "failed", "error": "boom"}
            ]"#,
        )
        .unwrap();

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].outcome, TestOutcome::Failed);
    }

    #[test]
    fn test_parse_results_json_lines() {
        let tests = parse_results(
            "{\"id\": \"a\", \"title\": \"one\", \"outcome\": \"passed\"}\n\n{\"id\": \"b\", \"title\": \"two\", \"outcome\": \"skipped\"}\n",
        )
        .unwrap();

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].id, "b");
    }

    #[test]
    fn test_parse_results_reports_line() {
        let err = parse_results("{\"id\": \"a\", \"title\": \"one\", \"outcome\": \"passed\"}\nnot json\n")
            .unwrap_err();

        assert!(err.to_string().contains("line 2"));
    }
}
