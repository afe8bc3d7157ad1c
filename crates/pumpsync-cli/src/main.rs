use anyhow::Context;
use clap::{Parser, Subcommand};
use pumpsync_config::{AppConfig, LoggingConfig};
use pumpsync_core::{ConnectionConfig, Error, Pipeline, PollScheduler, Registry};
use pumpsync_credential_store::{CredentialStore, FileCredentialStore};
use pumpsync_http_destination::HttpDestinationFactory;
use pumpsync_postgres_destination::PostgresDestinationFactory;
use pumpsync_postgres_source::PostgresSourceFactory;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pumpsync")]
#[command(about = "Forwards fuel pump transactions from a station database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct StationArgs {
    /// Path to configuration directory
    #[arg(short, long, default_value = "config")]
    config_dir: String,

    /// Organization code of the station to run
    #[arg(long)]
    organization: Option<String>,

    /// Gas station code of the station to run
    #[arg(long)]
    station: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the station database and forward transactions until stopped
    Start {
        #[command(flatten)]
        station: StationArgs,
    },

    /// Run a single poll cycle and exit
    Once {
        #[command(flatten)]
        station: StationArgs,
    },

    /// Store the connection parameters of a station
    Configure {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,

        #[arg(long)]
        organization: String,

        #[arg(long)]
        station: String,

        #[arg(long)]
        db_host: String,

        #[arg(long, default_value_t = 5432)]
        db_port: u16,

        #[arg(long)]
        db_name: String,

        #[arg(long)]
        db_user: String,

        #[arg(long, env = "PUMPSYNC_DB_PASSWORD", hide_env_values = true)]
        db_password: String,

        /// Role assumed for every session
        #[arg(long)]
        db_role: Option<String>,

        /// Company whose transactions are forwarded
        #[arg(long)]
        company_id: Option<String>,
    },

    /// Validate configuration and stored credentials
    Validate {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_fatal(&e) => {
            eprintln!("pumpsync cannot start: {:#}", e);
            eprintln!("Fix the configuration (or run `pumpsync configure`) and start again.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("pumpsync: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Start { station } => {
            let (app_config, pipeline) = prepare(&station).await?;

            let scheduler = PollScheduler::new(pipeline, app_config.scheduler.clone());
            let token = scheduler.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutting down pumpsync...");
                    token.cancel();
                }
            });

            scheduler.start();
            info!("pumpsync started");
            scheduler.wait().await?;

            let status = scheduler.status().await;
            info!(
                cycles = status.cycles,
                failed_cycles = status.failed_cycles,
                "pumpsync stopped"
            );
        }

        Commands::Once { station } => {
            let (_, mut pipeline) = prepare(&station).await?;

            let outcome = pipeline.poll_once().await;
            if let Err(e) = pipeline.disconnect().await {
                warn!("Error while disconnecting: {}", e);
            }
            let report = outcome?;

            println!(
                "✓ {}: fetched {}, forwarded {}, skipped {}",
                pipeline.station(),
                report.fetched,
                report.forwarded,
                report.skipped
            );

            let source = pipeline.source_status();
            println!(
                "  • source: {} rows, {} skipped as undecodable",
                source.records_fetched, source.rows_skipped
            );
            for (idx, status) in pipeline.destination_statuses().iter().enumerate() {
                println!(
                    "  • destination {}: {} batch(es), {} record(s)",
                    idx, status.batches_sent, status.records_written
                );
            }
        }

        Commands::Configure {
            config_dir,
            organization,
            station,
            db_host,
            db_port,
            db_name,
            db_user,
            db_password,
            db_role,
            company_id,
        } => {
            let app_config = AppConfig::load(&config_dir)?;
            init_tracing(&app_config.logging)?;

            let store = FileCredentialStore::open(&app_config.store.path)?;
            let entry = store
                .save(ConnectionConfig {
                    organization_code: organization,
                    gas_station_code: station,
                    db_host,
                    db_port,
                    db_name,
                    db_user,
                    db_password,
                    db_role,
                    company_id,
                })
                .await?;

            println!(
                "✓ Saved credentials for {} in {}",
                entry.key(),
                store.path().display()
            );
        }

        Commands::Validate { config_dir } => {
            let app_config = AppConfig::load(&config_dir)?;
            app_config.validate().map_err(configuration)?;

            println!("✓ Configuration is valid");
            println!(
                "\n🔄 Pipeline '{}': {} → {} destination(s), every {}s over the last {}h",
                app_config.pipeline.name,
                app_config.pipeline.source.source_type,
                app_config.pipeline.destinations.len(),
                app_config.scheduler.interval_secs,
                app_config.pipeline.window_hours
            );

            let registry = build_registry();
            let store = FileCredentialStore::open(&app_config.store.path)?;
            let entries = store.list().await?;

            println!("\n📍 Stations: {}", entries.len());
            for entry in entries {
                println!("  • {}", entry.key());
                if let Some(desc) = &entry.description {
                    println!("    {}", desc);
                }
                match Pipeline::from_config(
                    app_config.pipeline.clone(),
                    &entry.connection,
                    &registry,
                ) {
                    Ok(_) => println!("    ✓ Pipeline builds"),
                    Err(e) => println!("    ✗ Error: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// Load config, install logging, resolve the station and build its pipeline
async fn prepare(args: &StationArgs) -> anyhow::Result<(AppConfig, Pipeline)> {
    let app_config = AppConfig::load(&args.config_dir).map_err(configuration)?;
    init_tracing(&app_config.logging)?;
    app_config.validate().map_err(configuration)?;

    info!("Starting pumpsync with config directory: {}", args.config_dir);

    let store = FileCredentialStore::open(&app_config.store.path).map_err(configuration)?;
    let organization = args
        .organization
        .clone()
        .or_else(|| app_config.station.organization_code.clone());
    let station = args
        .station
        .clone()
        .or_else(|| app_config.station.gas_station_code.clone());
    let connection = store
        .resolve(organization.as_deref(), station.as_deref())
        .await
        .map_err(configuration)?;

    let registry = build_registry();
    info!("Available sources: {:?}", registry.list_sources());
    info!("Available destinations: {:?}", registry.list_destinations());

    let pipeline = Pipeline::from_config(app_config.pipeline.clone(), &connection, &registry)
        .with_context(|| format!("Cannot build pipeline for {}", connection.station()))?;

    Ok((app_config, pipeline))
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_source(Arc::new(PostgresSourceFactory));
    registry.register_destination(Arc::new(HttpDestinationFactory));
    registry.register_destination(Arc::new(PostgresDestinationFactory));
    registry
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

fn configuration(err: anyhow::Error) -> anyhow::Error {
    Error::Configuration(format!("{:#}", err)).into()
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<Error>())
        .any(Error::is_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_plugin() {
        let registry = build_registry();
        assert_eq!(registry.list_sources(), vec!["postgres"]);
        assert_eq!(registry.list_destinations(), vec!["http", "postgres"]);
    }

    #[test]
    fn start_accepts_station_selection() {
        let cli = Cli::try_parse_from([
            "pumpsync",
            "start",
            "--organization",
            "ORG1",
            "--station",
            "ST1",
        ])
        .unwrap();

        match cli.command {
            Commands::Start { station } => {
                assert_eq!(station.config_dir, "config");
                assert_eq!(station.organization.as_deref(), Some("ORG1"));
                assert_eq!(station.station.as_deref(), Some("ST1"));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn configure_requires_database_fields() {
        assert!(Cli::try_parse_from([
            "pumpsync",
            "configure",
            "--organization",
            "ORG1",
            "--station",
            "ST1"
        ])
        .is_err());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let fatal = configuration(anyhow::anyhow!("no stations"));
        assert!(is_fatal(&fatal));

        let wrapped: anyhow::Error =
            anyhow::Error::from(Error::Configuration("db_host must not be empty".into()))
                .context("Cannot build pipeline");
        assert!(is_fatal(&wrapped));

        let transient: anyhow::Error = Error::Connection("refused".into()).into();
        assert!(!is_fatal(&transient));
    }
}
