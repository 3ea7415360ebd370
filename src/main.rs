// ABOUTME: Entry point for the kvtunnel CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use kvtunnel::config::Config;
use kvtunnel::cache::CloseReport;
use kvtunnel::error::{Error, Result};
use kvtunnel::ssh::Tunnel;
use std::env;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(&env::current_dir()?)?,
    };

    match cli.command {
        Commands::Ping => ping(&config).await,
        Commands::Keys { pattern } => keys(&config, &pattern).await,
        Commands::Forward { local } => forward(&config, local).await,
    }
}

/// Connect, probe, and report the route taken.
async fn ping(config: &Config) -> Result<()> {
    let connection = config.connect().await?;

    let route = match connection.tunnel() {
        Some(tunnel) => format!("via SSH {}@{}", tunnel.user(), tunnel.host()),
        None => "direct".to_string(),
    };
    println!("PONG from {} ({})", connection.address(), route);

    report(connection.close().await);
    Ok(())
}

/// Print the keys matching `pattern`.
async fn keys(config: &Config, pattern: &str) -> Result<()> {
    let connection = config.connect().await?;

    let mut client = connection.client();
    let result: redis::RedisResult<Vec<String>> = redis::cmd("KEYS")
        .arg(pattern)
        .query_async(&mut client)
        .await;
    drop(client);

    report(connection.close().await);

    for key in result? {
        println!("{key}");
    }
    Ok(())
}

/// Forward a local port to the cache server until interrupted.
async fn forward(config: &Config, local: SocketAddr) -> Result<()> {
    let tunnel_config = config.tunnel_config()?.ok_or_else(|| {
        Error::InvalidConfig("forwarding requires a `tunnel` section".to_string())
    })?;

    let tunnel = Tunnel::connect(&tunnel_config).await?;
    let bound = tunnel
        .forward_local(local, &config.cache.host, config.cache.port)
        .await?;

    println!(
        "Forwarding {} -> {} via {}@{} (Ctrl-C to stop)",
        bound,
        config.cache.address(),
        tunnel.user(),
        tunnel.host()
    );

    tokio::signal::ctrl_c().await?;
    tunnel.disconnect().await?;
    Ok(())
}

fn report(close: CloseReport) {
    for warning in close.warnings() {
        eprintln!("Warning: {warning}");
    }
}
