// ABOUTME: Library root for kvtunnel - cache connections through optional SSH tunnels.
// ABOUTME: The command-line tool is in main.rs.

pub mod cache;
pub mod config;
pub mod error;
pub mod ssh;
