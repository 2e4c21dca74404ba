use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cadence_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence persistent job scheduler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the scheduler and API server
    Serve {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,

        #[arg(long, help = "Skip automatic database migration on startup")]
        skip_migrate: bool,
    },

    /// Run database migrations and exit
    Migrate,

    /// Validate a job YAML file offline
    Validate {
        /// Path to the job YAML file
        file: PathBuf,
    },

    /// Job management against a running server
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        #[arg(long)]
        enabled_only: bool,

        #[arg(long = "type")]
        job_type: Option<String>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, env = "CADENCE_SERVER", default_value = "http://localhost:5000")]
        server: String,
    },

    /// Show one job
    Show {
        id: String,

        #[arg(long, env = "CADENCE_SERVER", default_value = "http://localhost:5000")]
        server: String,
    },

    /// Trigger a manual execution
    Run {
        id: String,

        #[arg(long, help = "Allow overlapping with an in-flight execution")]
        allow_overlap: bool,

        #[arg(long, env = "CADENCE_SERVER", default_value = "http://localhost:5000")]
        server: String,
    },

    /// Execution history for a job
    History {
        id: String,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, env = "CADENCE_SERVER", default_value = "http://localhost:5000")]
        server: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(&path.to_string_lossy())?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn init_tracing(cli_level: Option<&str>, config: &Config) {
    let level = cli_level.unwrap_or(&config.logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(cli.log_level.as_deref(), &config);

    match cli.command {
        Commands::Serve {
            host,
            port,
            skip_migrate,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve(config, skip_migrate).await
        }
        Commands::Migrate => commands::migrate(&config).await,
        Commands::Validate { file } => commands::validate(&file),
        Commands::Job { command } => commands::job(command).await,
    }
}
