//! papo - resilient chat gateway for OpenAI-style completion upstreams
//!
//! A small gateway that fronts an unstable LLM completion API with key
//! rotation, retries, async job polling and streaming relay.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papo::config::Config;

#[derive(Parser)]
#[command(name = "papo")]
#[command(about = "Resilient chat gateway for OpenAI-style completion upstreams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papo=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let mut config = Config::from_file(&config)?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            papo::server::run_server(config).await
        }

        Commands::Check { config } => {
            let loaded = Config::from_file(&config)?;
            tracing::info!(
                keys = loaded.upstream.api_keys.len(),
                attempt_cap = loaded.upstream.attempt_cap,
                "Configuration OK"
            );
            println!(
                "OK: {} upstream key(s), model '{}', listen {}",
                loaded.upstream.api_keys.len(),
                loaded.upstream.model,
                loaded.server.listen
            );
            Ok(())
        }
    }
}
