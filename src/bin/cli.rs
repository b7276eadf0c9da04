//! tablesync CLI
//!
//! Sync a sheet into a remote table, dedupe it, export it, link records
//! across tables, or inspect its schema.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tablesync::client::{AirtableClient, RemoteTable};
use tablesync::config::SyncConfig;
use tablesync::link::{run_link, LinkOptions};
use tablesync::mirror::{export, MirrorOptions};
use tablesync::sheet::{expand_path, Workbook};
use tablesync::sync::SyncRunner;
use tablesync::{SyncError, TableApi};

#[derive(Parser)]
#[command(name = "tablesync")]
#[command(about = "Spreadsheet to remote table sync")]
#[command(version)]
struct Cli {
    /// TOML config file; flags and environment override it
    #[arg(long, global = true, env = "TABLESYNC_CONFIG")]
    config: Option<String>,

    /// API key
    #[arg(long, global = true, env = "AIRTABLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base identifier
    #[arg(long, global = true, env = "AIRTABLE_BASE_ID")]
    base_id: Option<String>,

    /// API root URL
    #[arg(long, global = true, env = "TABLESYNC_API_URL")]
    api_url: Option<String>,

    /// Remote table
    #[arg(short, long, global = true, env = "TABLESYNC_TABLE")]
    table: Option<String>,

    /// Natural key field
    #[arg(long, global = true, env = "TABLESYNC_KEY_FIELD")]
    key_field: Option<String>,

    /// Pause after every batch request, in milliseconds
    #[arg(long, global = true)]
    batch_delay_ms: Option<u64>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync sheet rows into the remote table
    Sync {
        /// Workbook file (.json or .csv)
        workbook: String,
        /// Sheet holding the rows
        #[arg(short, long, env = "TABLESYNC_SHEET")]
        sheet: Option<String>,
        /// Compute the plan without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every non-first record per key
    Dedupe {
        /// Only count duplicates
        #[arg(long)]
        dry_run: bool,
    },
    /// Export the remote table as CSV
    Export {
        /// Output file
        #[arg(short, long)]
        output: String,
        /// Sort ascending by this field
        #[arg(long)]
        sort_field: Option<String>,
        /// Fields to leave out (comma-separated)
        #[arg(long, value_delimiter = ',')]
        omit: Vec<String>,
    },
    /// Link source records to target records by email
    Link {
        /// Table whose records get the link (e.g. stories)
        #[arg(long, default_value = "Table 1")]
        source_table: String,
        /// Table linked to (e.g. users)
        #[arg(long, default_value = "Table 2")]
        target_table: String,
        /// Source field holding the email
        #[arg(long, default_value = "Customer Email")]
        match_field: String,
        /// Target field holding the email
        #[arg(long, default_value = "Email")]
        target_key_field: String,
        /// Source link field
        #[arg(long, default_value = "User")]
        link_field: String,
        /// Override the source filter formula
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show the remote table's field types
    Schema,
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let plain = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
    });
    let structured = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(plain)
        .with(structured)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

/// File config first, then flags and environment on top
fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = expand_path(path)?;
            SyncConfig::from_toml_file(&path)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => SyncConfig::default(),
    };

    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    if let Some(base) = &cli.base_id {
        config.base_id = base.clone();
    }
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(table) = &cli.table {
        config.table_name = table.clone();
    }
    if let Some(key_field) = &cli.key_field {
        config.key_field = key_field.clone();
    }
    if let Some(delay) = cli.batch_delay_ms {
        config.batch_delay_ms = delay;
    }

    config.validate()?;
    Ok(config)
}

fn remote_table(client: AirtableClient, config: &SyncConfig) -> RemoteTable<AirtableClient> {
    RemoteTable::new(client)
        .with_batch_size(config.batch_size)
        .with_batch_delay(config.batch_delay())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let json = cli.json;
    let Err(e) = run(cli).await else {
        return Ok(());
    };
    let kind = log_failure(&e);
    if json {
        print_json(&serde_json::json!({ "error": kind, "message": format!("{:#}", e) }))?;
        std::process::exit(1);
    }
    Err(e)
}

/// Log why the command stopped; returns the error kind
fn log_failure(e: &anyhow::Error) -> &'static str {
    let kind = e.downcast_ref::<SyncError>().map_or("error", SyncError::kind);
    error!("Aborting ({}): {:#}", kind, e);
    kind
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli)?;

    match &cli.command {
        Commands::Sync {
            workbook,
            sheet,
            dry_run,
        } => {
            if let Some(sheet) = sheet {
                config.sheet_name = sheet.clone();
            }
            let workbook = Workbook::load(workbook)?;
            let rows = workbook.sheet_or_only(&config.sheet_name)?.rows();
            info!("Read {} rows from sheet {}", rows.len(), config.sheet_name);

            let runner = SyncRunner::from_config(&config)?.dry_run(*dry_run);
            let report = runner.run(&rows).await?;

            if cli.json {
                print_json(&report)?;
            } else {
                println!("{}", report.summary());
                for dropped in &report.dropped_rows {
                    println!(
                        "  row {} dropped ({:?}): {}",
                        dropped.row,
                        dropped.reason,
                        dropped.key.as_deref().unwrap_or("")
                    );
                }
            }
        }

        Commands::Dedupe { dry_run } => {
            let runner = SyncRunner::from_config(&config)?.dry_run(*dry_run);
            let outcome = runner.dedupe_pass().await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!(
                    "{} records scanned, {} duplicates, {} removed",
                    outcome.scanned, outcome.duplicates, outcome.removed
                );
            }
        }

        Commands::Export {
            output,
            sort_field,
            omit,
        } => {
            let remote = remote_table(AirtableClient::from_config(&config)?, &config);
            let options = MirrorOptions {
                sort_field: sort_field.clone(),
                omit_fields: omit.iter().map(|f| f.trim().to_string()).collect(),
            };
            let path: PathBuf = expand_path(output)?;
            let written = export(&remote, &options, &path).await?;
            if cli.json {
                print_json(&serde_json::json!({ "records": written, "path": path }))?;
            } else {
                println!("Exported {} records to {}", written, path.display());
            }
        }

        Commands::Link {
            source_table,
            target_table,
            match_field,
            target_key_field,
            link_field,
            filter,
        } => {
            let client = AirtableClient::from_config(&config)?;
            let source = remote_table(client.for_table(source_table), &config);
            let target = remote_table(client.for_table(target_table), &config);

            let mut options = LinkOptions::new(match_field, target_key_field, link_field);
            if let Some(filter) = filter {
                options.filter_formula = filter.clone();
            }

            let report = run_link(&source, &target, &options).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "{} candidates, {} linked, {} without a match, {} batch errors",
                    report.candidates,
                    report.linked,
                    report.unmatched,
                    report.errors.len()
                );
            }
        }

        Commands::Schema => {
            let client = AirtableClient::from_config(&config)?;
            let schema = client.fetch_schema().await?;
            if cli.json {
                let fields: std::collections::BTreeMap<&str, &str> =
                    schema.iter().map(|(name, ty)| (name, ty.as_str())).collect();
                print_json(&fields)?;
            } else {
                let mut fields: Vec<_> = schema.iter().collect();
                fields.sort_by_key(|(name, _)| *name);
                for (name, field_type) in fields {
                    println!("{:<32} {}", name, field_type);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_missing_credentials_logged_as_error() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let parsed = cli(&["tablesync", "--api-key", "", "--base-id", "app1", "schema"]);
        let err = load_config(&parsed).unwrap_err();
        let kind = tracing::subscriber::with_default(subscriber, || log_failure(&err));

        assert_eq!(kind, "config");
        let logged = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(logged.contains("ERROR"), "log output: {}", logged);
        assert!(logged.contains("API key not set"), "log output: {}", logged);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tablesync.toml");
        std::fs::write(&path, "base_id = \"appFile\"\ntable_name = \"Customers\"\n").unwrap();

        let parsed = cli(&[
            "tablesync",
            "--config",
            path.to_str().unwrap(),
            "--api-key",
            "key",
            "--base-id",
            "appFlag",
            "dedupe",
        ]);
        let config = load_config(&parsed).unwrap();
        assert_eq!(config.base_id, "appFlag");
        assert_eq!(config.table_name, "Customers");
    }
}
