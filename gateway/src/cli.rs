//! # CLI Interface
//!
//! Defines the command-line argument structure for `vela-gateway` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VELA payment gateway.
///
/// Brokers per-transaction encrypted payment sessions between customer
/// clients and an upstream mobile-money processor. Serves the client
/// HTTP API and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "vela-gateway",
    about = "VELA payment gateway server",
    version,
    propagate_version = true
)]
pub struct VelaGatewayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the gateway binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway server.
    Run(RunArgs),
    /// Initialize a new gateway: creates the data directory and
    /// generates a fresh master key.
    Init(InitArgs),
    /// Query the health of a running gateway via its HTTP endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the gateway data directory where the transaction database
    /// and master key are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "VELA_DATA_DIR", default_value = "~/.vela")]
    pub data_dir: PathBuf,

    /// Port for the client-facing HTTP API.
    #[arg(long, env = "VELA_HTTP_PORT", default_value_t = vela_protocol::config::DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VELA_METRICS_PORT", default_value_t = vela_protocol::config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Base URL of the upstream payment processor.
    #[arg(long, env = "VELA_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Public base URL of this gateway, used to build the customer-facing
    /// page URLs returned at transaction creation.
    #[arg(long, env = "VELA_PUBLIC_URL")]
    pub public_url: String,

    /// Hex-encoded AES-256 master key protecting stored key material.
    ///
    /// If not provided, the gateway reads the key from `master.key` in the
    /// data directory. **Never pass this flag in production**; use the
    /// key file or a vault instead.
    #[arg(long, env = "VELA_MASTER_KEY")]
    pub master_key: Option<String>,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "VELA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "VELA_DATA_DIR", default_value = "~/.vela")]
    pub data_dir: PathBuf,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// HTTP endpoint of the running gateway.
    #[arg(long, default_value = "http://127.0.0.1:8740")]
    pub url: String,
}

/// Expands a leading `~` component to the user's home directory.
///
/// Clap hands default paths through verbatim, so without this the
/// default `~/.vela` would create a literal `./~` directory. Paths
/// without the prefix, and environments without `HOME`, pass through
/// unchanged.
pub fn expand_home(path: PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path,
        },
        Err(_) => path,
    }
}
