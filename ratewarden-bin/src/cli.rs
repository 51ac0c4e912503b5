use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ratewarden_config::ConfigLoader;

/// ratewarden — rate-limit fallback engine
#[derive(Parser)]
#[command(name = "ratewarden", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to fallback.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the six documented fallback scenarios against an in-memory host
    /// and print a trace of every host call and toast they produce.
    Demo,
    /// Run the engine against a host reachable over stdin/stdout JSON lines.
    Serve {
        /// Don't start the config file watcher.
        #[arg(long)]
        no_watch: bool,
    },
}

impl Cli {
    pub async fn run(self) -> ratewarden_core::Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;

        let log_level = self
            .log_level
            .clone()
            .or_else(|| std::env::var("RATEWARDEN_LOG").ok())
            .unwrap_or_else(|| "info".to_string());

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .with_target(false)
            .init();

        match self.command {
            Commands::Demo => crate::demo::run().await,
            Commands::Serve { no_watch } => crate::serve::run(config_loader, no_watch).await,
        }
    }
}
