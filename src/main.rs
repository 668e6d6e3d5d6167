//! Markerwatch - continuous identifier availability monitor
//!
//! A CLI tool that polls public data repositories for a fixed set of
//! identifiers, keeps a durable evidence log of every result, and raises
//! alerts when the windowed anomaly rate for an identifier crosses a
//! threshold.
//!
//! Exit codes:
//!   0 - Success (no alerts, or no --fail-on-alert set)
//!   1 - Runtime error (config, storage, task failure, etc.)
//!   2 - Alerts were raised and --fail-on-alert is set

mod analysis;
mod classify;
mod cli;
mod config;
mod error;
mod fingerprint;
mod models;
mod monitor;
mod report;
mod sources;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{RunOutcome, RunSummary};
use monitor::Orchestrator;
use store::EvidenceStore;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Markerwatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_monitor(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Monitoring failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .markerwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to add identifiers, sources, and thresholds.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` takes precedence over the verbosity flags when set.
fn init_logging(args: &Args) {
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete monitoring workflow. Returns exit code (0, 1 or 2).
async fn run_monitor(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    // Handle --dry-run: show what would be polled and exit
    if args.dry_run {
        return Ok(handle_dry_run(&config));
    }

    let output_dir = config.general.output_dir.clone();
    let evidence_path = output_dir.join("evidence.jsonl");
    let store = EvidenceStore::open(&evidence_path)
        .with_context(|| format!("Failed to open evidence log {}", evidence_path.display()))?;

    let sources = sources::build_sources(&config)?;

    println!(
        "🔭 Monitoring {} identifiers across {} sources",
        config.identifiers.len(),
        sources.len()
    );
    println!("   Evidence: {}", evidence_path.display());
    println!("   Run duration: {}s", config.monitor.run_duration_secs);
    println!(
        "   Alert threshold: {:.0}% over {}s",
        config.analysis.alert_threshold * 100.0,
        config.analysis.window_secs
    );

    let orchestrator = Orchestrator::new(config, sources, store)?;
    let summary = orchestrator.run().await;

    // Write the final report
    let report_path = report::write_summary(&summary, &output_dir, args.format)?;
    print_summary(&summary);
    println!("\n📝 Report saved to: {}", report_path.display());

    if summary.outcome == RunOutcome::Failed {
        return Ok(1);
    }

    if args.fail_on_alert && !summary.alerts.is_empty() {
        eprintln!(
            "\n⛔ {} alerts raised. Failing (exit code 2).",
            summary.alerts.len()
        );
        return Ok(2);
    }

    Ok(0)
}

/// Handle --dry-run: print the validated configuration, poll nothing.
fn handle_dry_run(config: &Config) -> i32 {
    println!("\n🔍 Dry run: configuration is valid (no requests made)\n");

    println!("   Identifiers (poll order):");
    for identifier in &config.identifiers {
        if identifier.related.is_empty() {
            println!("     • {}", identifier.id);
        } else {
            println!("     • {} (related: {})", identifier.id, identifier.related.join(", "));
        }
    }

    println!("\n   Sources:");
    for source in &config.sources {
        println!(
            "     📡 {} [{}] {}/s, {:?} classifier",
            source.display_name(),
            source.id,
            source.rate_limit,
            source.classifier
        );
    }

    println!("\n✅ Dry run complete. No sources were polled.");
    0
}

/// Print the end-of-run summary.
fn print_summary(summary: &RunSummary) {
    println!("\n📊 Run Summary ({}):", summary.outcome);
    println!("   Duration: {:.1}s", summary.duration_seconds);
    println!(
        "   Observations: {} ({} anomalous)",
        summary.total_observations(),
        summary.total_anomalous()
    );
    for source in &summary.sources {
        println!(
            "   - {}: {} polls, {} transport errors, {}",
            source.name, source.polls, source.transport_errors, source.status
        );
    }
    println!(
        "   Alerts: {} | Evidence packages: {}",
        summary.alerts.len(),
        summary.packages.len()
    );
    if let Some(ref error) = summary.error {
        println!("   ❌ {}", error);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e.context(format!("Failed to load {}", DEFAULT_CONFIG_FILE))),
    }
}
