// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VELA Gateway
//!
//! Entry point for the `vela-gateway` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the client HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the gateway server
//! - `init`   : initialize the data directory and generate a master key
//! - `status` : query a running gateway's health endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::sync::Arc;
use tokio::signal;

use vela_protocol::crypto::KeyProtector;
use vela_protocol::session::Orchestrator;
use vela_protocol::store::GatewayDb;
use vela_protocol::upstream::UpstreamClient;

use cli::{Commands, VelaGatewayCli};
use logging::LogFormat;
use metrics::GatewayMetrics;

/// File inside the data directory holding the hex-encoded master key.
const MASTER_KEY_FILE: &str = "master.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VelaGatewayCli::parse();

    match cli.command {
        Commands::Run(args) => run_gateway(args).await,
        Commands::Init(args) => init_gateway(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full gateway: client API server and metrics endpoint.
async fn run_gateway(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "vela_gateway=info,vela_protocol=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let data_dir = cli::expand_home(args.data_dir);

    tracing::info!(
        http_port = args.http_port,
        metrics_port = args.metrics_port,
        data_dir = %data_dir.display(),
        upstream = %args.upstream_url,
        "starting vela-gateway"
    );

    // --- Master key ---
    let master_key_hex = match args.master_key {
        Some(key) => key,
        None => {
            let key_path = data_dir.join(MASTER_KEY_FILE);
            std::fs::read_to_string(&key_path).with_context(|| {
                format!(
                    "failed to read master key from {} (run `vela-gateway init` first)",
                    key_path.display()
                )
            })?
        }
    };
    let protector =
        KeyProtector::from_hex(&master_key_hex).context("master key is not 64 hex characters")?;

    // --- Persistent storage ---
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = GatewayDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Upstream processor client ---
    let upstream = UpstreamClient::new(&args.upstream_url)
        .context("failed to build upstream processor client")?;

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(&db, protector, upstream, &args.public_url);

    // --- Metrics ---
    let gateway_metrics = Arc::new(GatewayMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            vela_protocol::config::PROTOCOL_VERSION,
        ),
        orchestrator: Arc::new(orchestrator),
        metrics: Arc::clone(&gateway_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.http_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("client API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("failed to flush database on shutdown")?;
    tracing::info!("vela-gateway stopped");
    Ok(())
}

/// Initializes the data directory and generates a fresh master key.
fn init_gateway(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("vela_gateway=info", LogFormat::Pretty);

    let data_dir = cli::expand_home(args.data_dir);
    tracing::info!(data_dir = %data_dir.display(), "initializing gateway");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(MASTER_KEY_FILE);
    if key_path.exists() {
        anyhow::bail!(
            "master key already exists at {} (refusing to overwrite)",
            key_path.display()
        );
    }

    // Generate the AES-256 master key protecting key material at rest.
    let mut key = [0u8; vela_protocol::config::MASTER_KEY_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut key);
    std::fs::write(&key_path, hex::encode(key))
        .with_context(|| format!("failed to write master key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(key_path = %key_path.display(), "master key generated");

    println!("Gateway initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Master key     : {}", key_path.display());

    Ok(())
}

/// Queries a running gateway's health endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let body = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .text()
        .await
        .context("failed to read health response body")?;
    println!("{}", body);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("vela-gateway {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", vela_protocol::config::PROTOCOL_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
