//! gemini-relay - credential-gated relay for the Gemini generateContent API
//!
//! Forwards generation requests to the upstream, re-framing streams as
//! Server-Sent Events, and serves an OpenAI-compatible chat endpoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gemini_relay::config::Config;
use gemini_relay::proxy::run_server;

#[derive(Parser)]
#[command(name = "gemini-relay")]
#[command(about = "Credential-gated relay for the Gemini generateContent API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
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

    /// Show the gate and upstream key pool (values redacted)
    Keys {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("gemini_relay={},tower_http=info", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Read the log level from the config before tracing is up.
fn configured_level(path: &str) -> String {
    Config::from_file(path)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            init_tracing(&configured_level(&config));
            tracing::info!(config = %config, "Loading configuration");

            let (mut loaded, key_sources) = Config::from_file_with_env(&config)?;
            for (label, source) in &key_sources {
                tracing::debug!(key = %label, source = %source, "Resolved key");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            run_server(loaded).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            println!("Configuration OK: {}", config);
            println!("  listen:      {}", loaded.server.listen);
            println!("  upstream:    {}", loaded.upstream.base_url);
            println!("  stream mode: {}", loaded.upstream.stream_mode);
            println!("  gated:       {}", loaded.auth.gate_key.is_some());
            println!("  pool keys:   {}", loaded.auth.keys.len());
            println!("  resolved:    {} key(s)", key_sources.len());
            Ok(())
        }

        Commands::Keys { config } => {
            init_tracing("warn");
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            println!(
                "Strategy: {} ({} upstream key(s))",
                loaded.auth.strategy,
                loaded.auth.keys.len()
            );
            if loaded.auth.gate_key.is_none() {
                println!("No gate key: client credentials are forwarded upstream");
            }
            for (label, source) in key_sources {
                println!("  {:<28} [REDACTED]  {}", label, source);
            }
            Ok(())
        }
    }
}
