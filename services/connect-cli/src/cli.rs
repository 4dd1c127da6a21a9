//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vehicle-connect", version, about = "Authenticated vehicle API client")]
pub struct Cli {
    /// Config file (falls back to CONNECT_CONFIG, then ./vehicle-connect.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Render Prometheus metrics to stderr after the command.
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send an authenticated request and print the response body.
    Request(RequestArgs),
    /// Install tokens obtained from the sign-in flow.
    Install(InstallArgs),
    /// Clear stored credentials.
    Logout,
    /// Show sign-in state and token expiry.
    Status,
}

#[derive(Debug, clap::Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, ...).
    pub method: String,
    /// Path relative to the environment's base URL.
    pub path: String,
    /// Extra header as `name:value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
    /// JSON request body.
    #[arg(long, value_parser = parse_json)]
    pub json: Option<serde_json::Value>,
    /// Override the configured base URL.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct InstallArgs {
    #[arg(long)]
    pub access_token: String,
    #[arg(long)]
    pub refresh_token: String,
    #[arg(long, default_value = connect_auth::DEFAULT_TOKEN_TYPE)]
    pub token_type: String,
    /// Access token lifetime in seconds. Omit when unknown.
    #[arg(long)]
    pub expires_in: Option<u64>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:value, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON body: {e}"))
}
