//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Markerwatch - continuous availability monitor for tracked identifiers
///
/// Polls public data repositories for a fixed set of identifiers, records
/// every result as evidence, and raises alerts when identifiers go missing,
/// restricted or reclassified at an unusual rate.
///
/// Examples:
///   markerwatch
///   markerwatch --config ./watch.toml --duration 600
///   markerwatch --threshold 0.5 --format json --fail-on-alert
///   markerwatch --dry-run
///   markerwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .markerwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "MARKERWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum run duration in seconds
    ///
    /// Overrides [monitor].run_duration_secs. Default: from config or 2700s.
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Directory for the evidence log, packages, alerts and reports
    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "MARKERWATCH_OUTPUT_DIR"
    )]
    pub output_dir: Option<PathBuf>,

    /// Alert when a windowed anomaly rate exceeds this value (0.0 - 1.0)
    #[arg(short, long, value_name = "RATE")]
    pub threshold: Option<f64>,

    /// Output format for the final report (markdown, json, csv)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if any alert was raised
    ///
    /// Useful for scheduled jobs that page on alerts.
    #[arg(long)]
    pub fail_on_alert: bool,

    /// Dry run: validate configuration and list what would be polled
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .markerwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
    /// CSV, one row per identifier and source
    Csv,
}

impl OutputFormat {
    /// File extension for reports in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(duration) = self.duration {
            if duration == 0 {
                return Err("Duration must be at least 1 second".to_string());
            }
        }

        if let Some(threshold) = self.threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err("Threshold must be greater than 0.0 and at most 1.0".to_string());
            }
        }

        if let Some(ref config) = self.config {
            if !config.is_file() {
                return Err(format!("Config file does not exist: {}", config.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            config: None,
            duration: None,
            output_dir: None,
            threshold: None,
            format: OutputFormat::Markdown,
            verbose: false,
            quiet: false,
            fail_on_alert: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "markerwatch",
            "--duration",
            "600",
            "--threshold",
            "0.5",
            "--format",
            "csv",
            "--fail-on-alert",
        ])
        .unwrap();

        assert_eq!(args.duration, Some(600));
        assert_eq!(args.threshold, Some(0.5));
        assert_eq!(args.format, OutputFormat::Csv);
        assert!(args.fail_on_alert);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_threshold_range() {
        let mut args = make_args();
        args.threshold = Some(1.5);
        assert!(args.validate().is_err());

        args.threshold = Some(0.0);
        assert!(args.validate().is_err());

        args.threshold = Some(1.0);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_duration() {
        let mut args = make_args();
        args.duration = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_config_file() {
        let mut args = make_args();
        args.config = Some(PathBuf::from("/nonexistent/markerwatch.toml"));
        assert!(args.validate().is_err());

        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_output_format_extension() {
        assert_eq!(OutputFormat::Markdown.extension(), "md");
        assert_eq!(OutputFormat::Json.extension(), "json");
        assert_eq!(OutputFormat::Csv.extension(), "csv");
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
