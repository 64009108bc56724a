//! email-mcp-rs: email MCP server over stdio
//!
//! Exposes IMAP search, flagging and folder moves plus SMTP send, reply and
//! forward to an MCP client. Each tool call opens its own mailbox session
//! and always closes it.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven account and timeout configuration
//! - [`errors`]: Application error model and connection failure classes
//! - [`imap`]: IMAP transport and session with timeout wrappers
//! - [`mailbox`]: Mailbox client seam and session release
//! - [`criteria`]: Filter to IMAP SEARCH translation
//! - [`fetch`]: Recent-window and filtered message retrieval
//! - [`mutate`]: Per-id flag and move mutations
//! - [`folders`]: Folder listing with optional counts
//! - [`compose`]: Send, reply and forward composition
//! - [`smtp`]: SMTP delivery via lettre
//! - [`deadline`]: Deadline racing for long operations
//! - [`server`]: MCP tool handlers with validation
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`mime`]: Header, body and attachment extraction

mod compose;
mod config;
mod criteria;
mod deadline;
mod errors;
mod fetch;
mod folders;
mod imap;
mod mailbox;
mod mime;
mod models;
mod mutate;
mod server;
mod smtp;

use std::path::PathBuf;

use clap::Parser;
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "email-mcp-rs",
    version,
    about = "Email MCP server (IMAP + SMTP) over stdio"
)]
struct Cli {
    #[arg(long, help = "Load environment from this file instead of ./.env")]
    env_file: Option<PathBuf>,

    #[arg(long, help = "Account used when a tool call names none")]
    default_account: Option<String>,
}

/// Application entry point
///
/// Loads `.env`, initializes tracing on stderr, loads config, and serves
/// the MCP server over stdio. This process expects to be spawned by an MCP
/// client via `stdio` transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = ServerConfig::load_from_env(cli.default_account)?;
    tracing::info!(
        accounts = config.accounts.len(),
        default_account = %config.default_account,
        "starting email MCP server"
    );
    let service = server::EmailServer::new(config).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
