use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use csv_provisioner::{
    config::{self, parse_delimiter, Config},
    logging,
    routes,
    services::{profiler::column_index, ColumnProfiler, Provisioner, SchemaInferrer},
    AppState,
};

/// Provision a PostgreSQL table, its roles and grants from a CSV file
#[derive(Parser)]
#[command(name = "csv-provisioner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Print the distinct values of one column
    Profile {
        path: PathBuf,

        /// Zero-based column index
        #[arg(short, long, allow_negative_numbers = true, conflicts_with = "name")]
        column: Option<i64>,

        /// Header name of the column
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        delimiter: Option<String>,
    },

    /// Print the table definition inferred from a CSV file
    Infer {
        path: PathBuf,

        #[arg(short, long)]
        table: Option<String>,

        #[arg(short, long)]
        delimiter: Option<String>,
    },

    /// Create the database, table, roles and grants, then verify them
    Provision {
        /// CSV file to load (overrides PROVISION_CSV_PATH)
        #[arg(long)]
        csv: Option<PathBuf>,

        #[arg(short, long)]
        table: Option<String>,

        /// Print the statements instead of running them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::load_config()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Profile { path, column, name, delimiter } => {
            let delimiter = delimiter
                .as_deref()
                .map(parse_delimiter)
                .transpose()?
                .unwrap_or(config.target.delimiter);
            let profiler = ColumnProfiler::new().with_delimiter(delimiter);

            let profile = match (column, name) {
                (Some(index), None) => profiler.profile_column(&path, column_index(index)?)?,
                (None, Some(name)) => profiler.profile_named(&path, &name)?,
                _ => anyhow::bail!("Pass either --column or --name"),
            };
            println!("{}", serde_json::to_string_pretty(&profile.summary())?);
            Ok(())
        }
        Commands::Infer { path, table, delimiter } => {
            let delimiter = delimiter
                .as_deref()
                .map(parse_delimiter)
                .transpose()?
                .unwrap_or(config.target.delimiter);
            let table = table.unwrap_or_else(|| routes::columns::default_table_name(&path));
            let inferrer = SchemaInferrer::new(
                ColumnProfiler::new().with_delimiter(delimiter),
                config.target.enum_threshold,
            );

            let schema = inferrer.infer(&path, &config.target.schema, &table)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Provision { csv, table, dry_run } => {
            let plan = config.provision_plan(csv, table)?;
            let provisioner = Provisioner::new(plan);

            if dry_run {
                for statement in provisioner.dry_run().await? {
                    println!("{};", statement);
                }
                return Ok(());
            }

            let report = provisioner.run(&config.postgres).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.verified {
                anyhow::bail!(
                    "Verification failed: {} privilege mismatches, {} scanned, {} loaded, {} counted",
                    report.mismatches().len(),
                    report.records_scanned,
                    report.rows_loaded,
                    report.rows_counted
                );
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.bind_addr;

    // Build our application state
    let state = Arc::new(AppState::new(config));
    let app = routes::app(state);

    // Run it
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
