//! Command-line interface for mongotab
//!
//! Two subcommands drive the two-phase workflow: `discover` samples a
//! collection and writes the field configuration file, `export` loads
//! that (possibly hand-edited) file and writes the CSV. Connection
//! settings come from flags first, then the TOML config file, then
//! defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{ConnectionSettings, DiscoveryConfiguration};
use crate::connection::MongoConnection;
use crate::discovery::DiscoveryEngine;
use crate::error::Result;
use crate::export::ConfigExporter;

/// Schema discovery and configuration-driven CSV export for MongoDB
#[derive(Parser, Debug)]
#[command(
    name = "mongotab",
    version,
    about = "Discover MongoDB collection schemas and export them as CSV",
    long_about = "Samples a schemaless MongoDB collection to infer its effective schema \
and cross-collection relationships, writes an editable field configuration, and \
exports flat CSV rows with identifier references resolved to display values."
)]
pub struct CliArgs {
    /// MongoDB connection URI
    #[arg(long, value_name = "URI")]
    pub uri: Option<String>,

    /// Database name (overrides the URI's default database)
    #[arg(long, value_name = "NAME")]
    pub database: Option<String>,

    /// Connection settings file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Quiet mode (warnings only, no progress bar)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample a collection and write its field configuration
    Discover {
        /// Collection to discover
        collection: String,

        /// Documents to sample
        #[arg(long, value_name = "N")]
        sample_size: Option<u64>,

        /// Maximum nesting depth to traverse
        #[arg(long, value_name = "N")]
        expansion_depth: Option<usize>,

        /// Minimum distinct non-null values for inclusion
        #[arg(long, value_name = "N")]
        min_distinct: Option<usize>,

        /// Configuration output path (default: config/<collection>_fields.json)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Export a collection according to its field configuration
    Export {
        /// Collection to export
        collection: String,

        /// Configuration file (default: config/<collection>_fields.json)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// CSV output path (default: <collection>_export.csv)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Stop after this many rows
        #[arg(long, value_name = "N")]
        limit: Option<u64>,

        /// Use raw field paths as column headers instead of business names
        #[arg(long)]
        raw_headers: bool,
    },
}

impl CliArgs {
    /// Resolve connection settings: flags over file over defaults.
    fn connection_settings(&self) -> Result<ConnectionSettings> {
        let path = self
            .config_file
            .clone()
            .unwrap_or_else(ConnectionSettings::default_path);
        let settings = ConnectionSettings::load(path)?;
        Ok(settings.with_overrides(self.uri.clone(), self.database.clone()))
    }
}

/// Dispatch the parsed arguments.
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = args.connection_settings()?;
    let connection = MongoConnection::connect(&settings).await?;

    match &args.command {
        Command::Discover {
            collection,
            sample_size,
            expansion_depth,
            min_distinct,
            output,
        } => {
            run_discover(
                &connection,
                collection,
                *sample_size,
                *expansion_depth,
                *min_distinct,
                output.clone(),
            )
            .await
        }
        Command::Export {
            collection,
            config,
            output,
            limit,
            raw_headers,
        } => {
            run_export(
                &connection,
                collection,
                config.clone(),
                output.clone(),
                *limit,
                *raw_headers,
                !args.quiet,
            )
            .await
        }
    }
}

async fn run_discover(
    connection: &MongoConnection,
    collection: &str,
    sample_size: Option<u64>,
    expansion_depth: Option<usize>,
    min_distinct: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut params = crate::config::DiscoveryParameters::default();
    if let Some(n) = sample_size {
        params.sample_size = n;
    }
    if let Some(n) = expansion_depth {
        params.expansion_depth = n;
    }
    if let Some(n) = min_distinct {
        params.min_distinct_non_null_values = n;
    }

    let engine = DiscoveryEngine::new(connection.database(), collection, params);
    let config = engine.discover().await?;

    let path = output.unwrap_or_else(|| DiscoveryConfiguration::config_file(collection));
    config.save_to_file(&path)?;

    let included = config.included_fields().len();
    println!(
        "Discovered {} fields ({} included) in '{}'",
        config.fields.len(),
        included,
        collection
    );
    if !config.required_collections.is_empty() {
        println!(
            "Referenced collections: {}",
            config.required_collections.join(", ")
        );
    }
    println!("Configuration written to {}", path.display());
    println!("Edit the file to adjust included fields, then run: mongotab export {collection}");
    Ok(())
}

async fn run_export(
    connection: &MongoConnection,
    collection: &str,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    limit: Option<u64>,
    raw_headers: bool,
    show_progress: bool,
) -> Result<()> {
    let path = config_path.unwrap_or_else(|| DiscoveryConfiguration::config_file(collection));
    let mut config = DiscoveryConfiguration::load_from_file(&path)?;
    if raw_headers {
        config.export_settings.use_business_names = false;
    }

    let output = output.unwrap_or_else(|| PathBuf::from(format!("{collection}_export.csv")));
    let output = output.to_string_lossy().into_owned();

    // Ctrl+C stops the export at the next batch boundary; rows already
    // flushed stay on disk.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let exporter = ConfigExporter::new(connection.database(), config);
    let report = exporter
        .export(&output, limit, cancel, show_progress)
        .await?;
    signal_task.abort();

    println!(
        "Exported {} of {} documents to {} ({} skipped, {:.1}s)",
        report.rows_written,
        report.source_count,
        output,
        report.documents_skipped,
        report.elapsed_seconds
    );
    if report.rows_written + report.documents_skipped < report.source_count
        && limit.is_none()
    {
        warn!(
            rows = report.rows_written,
            source = report.source_count,
            "fewer rows written than source documents"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_discover() {
        let args = CliArgs::try_parse_from([
            "mongotab",
            "--database",
            "prod",
            "discover",
            "listings",
            "--sample-size",
            "500",
        ])
        .unwrap();
        assert_eq!(args.database.as_deref(), Some("prod"));
        match args.command {
            Command::Discover {
                collection,
                sample_size,
                ..
            } => {
                assert_eq!(collection, "listings");
                assert_eq!(sample_size, Some(500));
            }
            _ => panic!("expected discover subcommand"),
        }
    }

    #[test]
    fn test_parse_export_with_limit() {
        let args = CliArgs::try_parse_from([
            "mongotab",
            "export",
            "listings",
            "--limit",
            "100",
            "--raw-headers",
        ])
        .unwrap();
        match args.command {
            Command::Export {
                collection,
                limit,
                raw_headers,
                ..
            } => {
                assert_eq!(collection, "listings");
                assert_eq!(limit, Some(100));
                assert!(raw_headers);
            }
            _ => panic!("expected export subcommand"),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["mongotab"]).is_err());
    }
}
