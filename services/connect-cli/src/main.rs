//! vehicle-connect
//!
//! Command-line client for the vehicle API:
//! 1. Loads the environment config and the persisted credential
//! 2. Dispatches requests with the bearer credential
//! 3. Refreshes the credential on 401, bounded by the retry policy
//! 4. Reports when the session has to be re-established

mod cli;
mod config;
mod metrics;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::Secret;
use connect_auth::{
    ClientCredentials, Credential, CredentialStore, FileCredentialStore, HttpTokenRefreshClient,
    now_millis,
};
use connect_dispatch::{Outcome, RequestDescriptor, RequestDispatcher};
use connect_session::{FailureSignal, RefreshCoordinator};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, InstallArgs, RequestArgs};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so response bodies on stdout stay machine-readable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.print_metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        environment = %config.environment.title,
        base_url = %config.environment.base_url,
        signin_url = %config.environment.signin_url,
        "configuration loaded"
    );

    let store = Arc::new(
        FileCredentialStore::load(config.auth.credentials_path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credentials from {}",
                    config.auth.credentials_path.display()
                )
            })?,
    );

    let result = match cli.command {
        Command::Request(args) => request(&config, store, args).await,
        Command::Install(args) => install(&config, store, args).await,
        Command::Logout => logout(&config, store).await,
        Command::Status => status(&store).await,
    };

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }
    result
}

/// Refresh coordinator over the file store, talking to the configured token endpoint.
///
/// The failed-refresh count persisted by earlier invocations is picked up, so
/// the retry bound holds across processes. Only `request` can trigger a
/// refresh, so it alone insists on a client secret.
async fn coordinator(
    config: &Config,
    http: reqwest::Client,
    store: Arc<FileCredentialStore>,
) -> RefreshCoordinator {
    let secret = config
        .environment
        .client_secret
        .clone()
        .unwrap_or_else(|| Secret::new(String::new()));
    let credentials = ClientCredentials::new(config.environment.client_id.clone(), secret);
    let refresher = HttpTokenRefreshClient::new(http, &config.environment.signin_url, credentials);
    debug!(token_url = %refresher.token_url(), "token endpoint configured");

    RefreshCoordinator::resume(
        store,
        Arc::new(refresher),
        FailureSignal::new(),
        config.retry_policy(),
    )
    .await
}

async fn request(config: &Config, store: Arc<FileCredentialStore>, args: RequestArgs) -> Result<()> {
    let method = reqwest::Method::from_str(&args.method.to_ascii_uppercase())
        .with_context(|| format!("invalid HTTP method {:?}", args.method))?;
    let base_url = args
        .base_url
        .unwrap_or_else(|| config.environment.base_url.clone());
    let mut descriptor = RequestDescriptor::new(method, base_url, args.path);
    for (name, value) in args.headers {
        descriptor = descriptor.header(name, value);
    }
    if let Some(body) = args.json {
        descriptor = descriptor.json(body);
    }

    match run_request(config, store, &descriptor).await? {
        Outcome::Success { body, .. } => {
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
        Outcome::Failure { kind, status, body } => {
            if let Some(body) = body.filter(|b| !b.is_empty()) {
                eprintln!("{}", String::from_utf8_lossy(&body));
            }
            match status {
                Some(status) => anyhow::bail!("request failed with status {status}: {kind}"),
                None => anyhow::bail!("request failed: {kind}"),
            }
        }
    }
}

/// Dispatch one request through a coordinator resumed from `store`.
async fn run_request(
    config: &Config,
    store: Arc<FileCredentialStore>,
    descriptor: &RequestDescriptor,
) -> Result<Outcome> {
    config.client_secret()?;
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let coordinator = coordinator(config, http.clone(), store).await;

    let signal = coordinator.signal().clone();
    let watcher = tokio::spawn(async move {
        signal.failed().await;
        error!("refresh attempts exhausted, credentials cleared; sign in again");
    });

    let dispatcher = RequestDispatcher::new(http, coordinator.clone(), config.request_timeout());
    let outcome = dispatcher.dispatch(descriptor).await;

    if coordinator.signal().is_failed() {
        let _ = tokio::time::timeout(Duration::from_millis(100), watcher).await;
    } else {
        watcher.abort();
    }
    Ok(outcome)
}

/// Absolute expiry in epoch milliseconds for a lifetime in seconds; 0 when unknown.
fn expires_at(expires_in: Option<u64>, now: i64) -> i64 {
    expires_in.filter(|secs| *secs > 0).map_or(0, |secs| {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        now.saturating_add(secs.saturating_mul(1000))
    })
}

async fn install(config: &Config, store: Arc<FileCredentialStore>, args: InstallArgs) -> Result<()> {
    let credential = Credential::new(
        args.access_token,
        args.refresh_token,
        args.token_type,
        expires_at(args.expires_in, now_millis()),
    );

    let coordinator = coordinator(config, reqwest::Client::new(), store.clone()).await;
    coordinator.install_credential(credential).await;

    println!("credential installed at {}", store.path().display());
    Ok(())
}

async fn logout(config: &Config, store: Arc<FileCredentialStore>) -> Result<()> {
    let coordinator = coordinator(config, reqwest::Client::new(), store).await;
    coordinator.sign_out().await;

    println!("signed out");
    Ok(())
}

async fn status(store: &FileCredentialStore) -> Result<()> {
    let credential = store.get().await;
    let now = now_millis();
    let report = serde_json::json!({
        "logged_in": store.is_logged_in().await,
        "failed_refreshes": store.failed_refreshes().await,
        "has_refresh_token": credential.has_refresh_token(),
        "token_type": credential.token_type,
        "expires_at": credential.expires_at,
        "expired": credential.is_expired_at(now),
        "credentials_path": store.path().display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connect_dispatch::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, credentials_path: &std::path::Path) -> Config {
        let toml = format!(
            r#"
[environment]
title = "test"
client_id = "vc-app"
base_url = "{uri}"
signin_url = "{uri}"

[auth]
credentials_path = "{creds}"
"#,
            uri = server.uri(),
            creds = credentials_path.display(),
        );
        let mut config: Config = toml::from_str(&toml).unwrap();
        config.environment.client_secret = Some(Secret::new("secret".to_string()));
        config
    }

    #[test]
    fn expires_at_saturates() {
        assert_eq!(expires_at(None, 1_000), 0);
        assert_eq!(expires_at(Some(0), 1_000), 0);
        assert_eq!(expires_at(Some(60), 1_000), 61_000);
        assert_eq!(expires_at(Some(u64::MAX), 1_000), i64::MAX);
        assert_eq!(expires_at(Some(1), i64::MAX - 10), i64::MAX);
    }

    #[tokio::test]
    async fn retry_bound_holds_across_invocations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vehicles"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(connect_auth::TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(5)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let credentials_path = dir.path().join("credentials.json");
        let config = test_config(&server, &credentials_path);
        FileCredentialStore::load(credentials_path.clone())
            .await
            .unwrap()
            .set(Credential::new("at_1", "rt_1", "Bearer", 0))
            .await;

        let descriptor = RequestDescriptor::get(server.uri(), "/v1/vehicles");
        for invocation in 1..=6 {
            // A fresh store per call, as each CLI run loads the file anew
            let store = Arc::new(
                FileCredentialStore::load(credentials_path.clone())
                    .await
                    .unwrap(),
            );
            let outcome = run_request(&config, store, &descriptor).await.unwrap();
            let expected = if invocation < 5 {
                ErrorKind::Unauthorized
            } else {
                ErrorKind::RefreshTokenFailed
            };
            assert_eq!(
                outcome.error_kind(),
                Some(&expected),
                "invocation {invocation}"
            );
        }

        let store = FileCredentialStore::load(credentials_path).await.unwrap();
        assert!(store.get().await.is_empty());
        assert_eq!(store.failed_refreshes().await, 5);
    }
}
