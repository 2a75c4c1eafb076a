use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bioreactor_gateway::{Config, EventLog, Gateway, SchemaVersion};

/// Bioreactor - telemetry and command gateway for a bioreactor controller
#[derive(Parser)]
#[command(name = "bioreactor", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header row of a schema version
    Schema {
        /// Schema version (defaults to the configured one)
        #[arg(long)]
        version: Option<SchemaVersion>,
    },
    /// Print the most recent telemetry records as JSON lines
    Tail {
        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,bioreactor_gateway=info",
        1 => "info,bioreactor_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Schema { version } => {
                print_schema(version.unwrap_or(config.storage.schema));
                Ok(())
            }
            Command::Tail { lines } => tail(&config, lines),
        };
    }

    tracing::info!(
        port = config.api_server.port,
        schema = %config.storage.schema,
        mqtt = config.mqtt.enabled,
        "starting bioreactor gateway"
    );

    Gateway::new(config)?.run().await?;
    Ok(())
}

fn print_schema(version: SchemaVersion) {
    println!("{}", version.header().join(","));
}

fn tail(config: &Config, lines: usize) -> anyhow::Result<()> {
    let path = config.storage.log_path();
    if !path.exists() {
        anyhow::bail!("no telemetry log at {}", path.display());
    }

    let log = EventLog::open(&path, config.storage.schema)?;
    for record in log.tail(lines)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
