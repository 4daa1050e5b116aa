mod agent_commands;
mod config_commands;
mod credentials_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    courier_config::CourierConfig,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: inbound messages in, agent replies out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message to an agent and print the reply.
    Agent(agent_commands::AgentArgs),
    /// Credential pool inspection.
    Credentials {
        #[command(subcommand)]
        action: credentials_commands::CredentialsAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// The explicit config file when given, otherwise the discovered one.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<CourierConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Ok(courier_config::load_config(path)?)
        },
        None => Ok(courier_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_telemetry(&cli);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Agent(args) => agent_commands::handle_agent(args, config_path).await,
        Commands::Credentials { action } => {
            credentials_commands::handle_credentials(action, config_path).await
        },
        Commands::Config { action } => config_commands::handle_config(action, config_path),
    }
}
