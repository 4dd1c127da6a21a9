//! Bearer credential and the store contract
//!
//! A single credential is active per session. Every dispatched request reads
//! it; only the refresh coordinator and the login flow write it. Stores must
//! hand out whole snapshots so a reader never sees an access token from one
//! refresh paired with the token type of another.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Boxed future returned by [`CredentialStore`] methods.
///
/// `Pin<Box<dyn Future>>` keeps the trait dyn-compatible (`Arc<dyn CredentialStore>`).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// OAuth credential for the signed-in user.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed when the token response is received. The empty credential (all
/// strings empty, `expires_at == 0`) means "not signed in".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token sent on every API call
    pub access_token: String,
    /// Long-lived token exchanged for a new access token
    pub refresh_token: String,
    /// Authorization scheme, normally "Bearer"
    pub token_type: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: i64,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            expires_at,
        }
    }

    /// True for the cleared / never-signed-in credential.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() && self.refresh_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// `Authorization` header value, or `None` when either half is missing.
    pub fn authorization(&self) -> Option<String> {
        if self.access_token.is_empty() || self.token_type.is_empty() {
            return None;
        }
        Some(format!("{} {}", self.token_type, self.access_token))
    }

    /// Whether the access token has expired at `now` (unix millis).
    ///
    /// A zero expiry is treated as unknown, not expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redacted(&self.access_token))
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "[REDACTED]" }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Storage for the active credential.
///
/// Implementations must be safe for concurrent readers and writers and must
/// swap the whole credential atomically. Persistence failures are the
/// implementation's concern: they are logged, never returned.
pub trait CredentialStore: Send + Sync {
    /// Snapshot of the current credential (empty when signed out).
    fn get(&self) -> StoreFuture<'_, Credential>;

    /// Replace the current credential.
    fn set(&self, credential: Credential) -> StoreFuture<'_, ()>;

    /// Drop all credential data.
    ///
    /// The failed-refresh count survives: signing out does not lift a
    /// terminal refresh failure.
    fn clear(&self) -> StoreFuture<'_, ()>;

    /// Consecutive failed refresh attempts recorded for this session.
    fn failed_refreshes(&self) -> StoreFuture<'_, u32>;

    /// Record the consecutive failed refresh count.
    fn set_failed_refreshes(&self, count: u32) -> StoreFuture<'_, ()>;
}

/// In-process credential store with no persistence.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Credential>,
    failed_refreshes: AtomicU32,
}

impl MemoryCredentialStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            state: RwLock::new(credential),
            failed_refreshes: AtomicU32::new(0),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn set(&self, credential: Credential) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            *self.state.write().await = credential;
            debug!("credential updated");
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            *self.state.write().await = Credential::default();
            debug!("credential cleared");
        })
    }

    fn failed_refreshes(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move { self.failed_refreshes.load(Ordering::SeqCst) })
    }

    fn set_failed_refreshes(&self, count: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.failed_refreshes.store(count, Ordering::SeqCst) })
    }
}
