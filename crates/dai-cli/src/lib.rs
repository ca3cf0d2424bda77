//! Dai command-line client library

pub mod console;
pub mod render;
pub mod task;

use anyhow::{Context, Result};
use dai_client_api::TaskApi;
use dai_rest_client::{ClientConfig, RestClient, DEFAULT_BASE_URL};
use std::sync::Arc;
use std::time::Duration;

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dai")]
#[command(about = "Drive Dai agent tasks from the terminal")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// URL of the Dai task service
    #[arg(long, env = "DAI_SERVER", default_value = DEFAULT_BASE_URL, global = true)]
    pub server: String,

    /// Seconds to wait for the connection to the service
    #[arg(long, value_name = "SECS", default_value_t = 10, global = true)]
    pub connect_timeout_secs: u64,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Task commands
    Task {
        #[command(subcommand)]
        subcommand: task::TaskCommands,
    },
}

impl Cli {
    /// Default log filter when RUST_LOG is unset
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "warn"
        }
    }

    /// Build the REST client for the configured server
    pub fn connect(&self) -> Result<Arc<dyn TaskApi>> {
        let config = ClientConfig::from_url(&self.server)
            .with_context(|| format!("Invalid server URL: {}", self.server))?
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        let client = RestClient::new(config).context("Failed to create REST client")?;
        Ok(Arc::new(client))
    }
}
