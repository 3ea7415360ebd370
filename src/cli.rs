// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kvtunnel")]
#[command(about = "Reach a Redis-compatible cache, optionally through an SSH tunnel")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: kvtunnel.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and check that the cache server answers
    Ping,

    /// List keys matching a pattern
    Keys {
        /// Glob-style pattern, e.g. "user:*"
        pattern: String,
    },

    /// Forward a local port to the cache server through the tunnel
    Forward {
        /// Local address to listen on
        #[arg(short, long, default_value = "127.0.0.1:6380")]
        local: SocketAddr,
    },
}
