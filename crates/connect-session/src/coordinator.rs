//! Single-flight token refresh with a cumulative failure bound
//!
//! States:
//! - `Idle` → `Refreshing` (a rejected request asks for a fresh credential)
//! - `Refreshing` → `Idle` (refresh succeeded, or failed below the bound)
//! - `Refreshing` → `Failed` (failure count reached `max_attempts`)
//! - `Failed` → `Idle` (a new credential is installed)
//!
//! Sign-out clears the credential but does not leave `Failed`. A refresh
//! requested with no refresh token stored fails without counting toward the
//! bound. The failure count is written through the store so a coordinator
//! built with [`RefreshCoordinator::resume`] continues where the last process
//! stopped.
//!
//! The refresh runs on its own task and publishes its result on a `watch`
//! channel. Every caller that arrives while it is in flight awaits the same
//! channel, so they all receive the same credential or the same failure. A
//! caller being cancelled never strands the coordinator in `Refreshing`.

use std::sync::Arc;
use std::time::Duration;

use connect_auth::{
    Credential, CredentialStore, RefreshError, TokenRefreshClient, TokenResponse, now_millis,
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::signal::FailureSignal;
use crate::telemetry;

/// Failed refreshes tolerated before the session is torn down.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound on a single refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds applied to refresh attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Cumulative failed refreshes (across calls) that trigger terminal failure.
    pub max_attempts: u32,
    /// A refresh still pending after this long counts as a failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Result of asking the coordinator for a fresh credential.
#[derive(Debug, Clone)]
pub enum RefreshResult {
    /// A usable credential, newer than the one that was rejected.
    Refreshed(Credential),
    /// This refresh failed but the bound was not reached; a later 401 may retry.
    Failed(RefreshError),
    /// Retry budget exhausted. Credentials were cleared.
    TerminallyFailed,
}

type ResultSlot = watch::Receiver<Option<RefreshResult>>;

enum Phase {
    Idle,
    Refreshing(ResultSlot),
    Failed,
}

struct State {
    phase: Phase,
    attempts: u32,
    /// Bumped whenever a credential is installed from outside, so a refresh
    /// that started before the install cannot overwrite it.
    epoch: u64,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    client: Arc<dyn TokenRefreshClient>,
    signal: FailureSignal,
    policy: RetryPolicy,
    state: Mutex<State>,
}

/// Shared refresh state machine.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        client: Arc<dyn TokenRefreshClient>,
        signal: FailureSignal,
        policy: RetryPolicy,
    ) -> Self {
        info!(
            max_attempts = policy.max_attempts,
            timeout_secs = policy.timeout.as_secs(),
            "refresh coordinator initialized"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                signal,
                policy,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    attempts: 0,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Build a coordinator that picks up the failure count persisted in `store`.
    ///
    /// A count already at the bound starts the coordinator in terminal failure
    /// with the signal raised.
    pub async fn resume(
        store: Arc<dyn CredentialStore>,
        client: Arc<dyn TokenRefreshClient>,
        signal: FailureSignal,
        policy: RetryPolicy,
    ) -> Self {
        let persisted = store.failed_refreshes().await;
        let coordinator = Self::new(store, client, signal, policy);
        {
            let inner = &coordinator.inner;
            let mut state = inner.state.lock().await;
            state.attempts = persisted;
            if persisted > 0 && persisted >= inner.policy.max_attempts {
                state.phase = Phase::Failed;
                inner.signal.set(true);
                warn!(
                    attempts = persisted,
                    max_attempts = inner.policy.max_attempts,
                    "resuming after exhausted refresh attempts"
                );
            } else if persisted > 0 {
                debug!(attempts = persisted, "resuming with earlier refresh failures");
            }
        }
        coordinator
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn signal(&self) -> &FailureSignal {
        &self.inner.signal
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Failed refreshes since the last success or install.
    pub async fn attempts(&self) -> u32 {
        self.inner.state.lock().await.attempts
    }

    pub async fn is_terminal(&self) -> bool {
        matches!(self.inner.state.lock().await.phase, Phase::Failed)
    }

    /// Obtain a fresh credential, joining an in-flight refresh if there is one.
    pub async fn ensure_fresh_credential(&self) -> RefreshResult {
        self.refresh_rejected(None).await
    }

    /// Like [`ensure_fresh_credential`](Self::ensure_fresh_credential), for a
    /// caller whose request was rejected while carrying `rejected_access_token`.
    ///
    /// If the stored access token already differs (a refresh completed after
    /// that request was sent), the stored credential is returned without
    /// touching the network.
    pub async fn refresh_rejected(&self, rejected_access_token: Option<&str>) -> RefreshResult {
        let slot = {
            let mut state = self.inner.state.lock().await;

            if matches!(state.phase, Phase::Failed) {
                debug!("refresh requested after terminal failure, not contacting token endpoint");
                return RefreshResult::TerminallyFailed;
            }

            let in_flight = match &state.phase {
                // A closed slot with no value means the refresh task died
                // without settling; start over instead of waiting on it.
                Phase::Refreshing(slot) if slot.has_changed().is_ok() => Some(slot.clone()),
                _ => None,
            };

            if let Some(slot) = in_flight {
                debug!("refresh already in flight, waiting for its result");
                telemetry::record_coalesced();
                slot
            } else {
                if let Some(rejected) = rejected_access_token {
                    let current = self.inner.store.get().await;
                    if !current.access_token.is_empty() && current.access_token != rejected {
                        debug!("credential rotated since the rejected request was sent");
                        return RefreshResult::Refreshed(current);
                    }
                }

                let (tx, slot) = watch::channel(None);
                state.phase = Phase::Refreshing(slot.clone());
                let epoch = state.epoch;
                tokio::spawn(Arc::clone(&self.inner).run_refresh(epoch, tx));
                slot
            }
        };

        await_result(slot).await
    }

    /// Install a credential from the login flow.
    ///
    /// Resets the failure count, leaves terminal failure and lowers the
    /// failure signal. A refresh still in flight is discarded when it settles.
    pub async fn install_credential(&self, credential: Credential) {
        let mut state = self.inner.state.lock().await;
        state.epoch += 1;
        state.attempts = 0;
        state.phase = Phase::Idle;
        self.inner.store.set(credential).await;
        self.inner.store.set_failed_refreshes(0).await;
        self.inner.signal.set(false);
        info!("credential installed, refresh state reset");
    }

    /// Drop the session on explicit sign-out.
    ///
    /// Sign-out is not a failure and never raises the signal. It does not lift
    /// a terminal failure either: only installing a credential does.
    pub async fn sign_out(&self) {
        let mut state = self.inner.state.lock().await;
        state.epoch += 1;
        if !matches!(state.phase, Phase::Failed) {
            state.phase = Phase::Idle;
        }
        self.inner.store.clear().await;
        info!(terminal = matches!(state.phase, Phase::Failed), "signed out, credentials cleared");
    }
}

impl Inner {
    async fn run_refresh(self: Arc<Self>, epoch: u64, tx: watch::Sender<Option<RefreshResult>>) {
        let current = self.store.get().await;

        if !current.has_refresh_token() {
            let mut state = self.state.lock().await;
            if state.epoch == epoch {
                state.phase = Phase::Idle;
            }
            debug!("no refresh token stored, nothing to refresh");
            let _ = tx.send(Some(RefreshResult::Failed(RefreshError::Generic(
                "no refresh token stored".into(),
            ))));
            return;
        }

        let outcome = match tokio::time::timeout(
            self.policy.timeout,
            self.client.refresh(&current.refresh_token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Generic(format!(
                "token refresh timed out after {}s",
                self.policy.timeout.as_secs()
            ))),
        };

        let result = self.settle(epoch, &current, outcome).await;
        let _ = tx.send(Some(result));
    }

    /// Apply a refresh outcome to the store, counter and phase.
    async fn settle(
        &self,
        epoch: u64,
        previous: &Credential,
        outcome: Result<TokenResponse, RefreshError>,
    ) -> RefreshResult {
        let mut state = self.state.lock().await;

        if state.epoch != epoch {
            debug!("credential replaced during refresh, discarding refresh result");
            let current = self.store.get().await;
            return if current.access_token.is_empty() {
                RefreshResult::Failed(RefreshError::Generic(
                    "session reset during refresh".into(),
                ))
            } else {
                RefreshResult::Refreshed(current)
            };
        }

        match outcome {
            Ok(token) => {
                let credential = token.into_credential(previous, now_millis());
                self.store.set(credential.clone()).await;
                self.store.set_failed_refreshes(0).await;
                let previous_failures = std::mem::replace(&mut state.attempts, 0);
                state.phase = Phase::Idle;
                self.signal.set(false);
                telemetry::record_refresh("success");
                info!(previous_failures, "token refresh succeeded");
                RefreshResult::Refreshed(credential)
            }
            Err(err) => {
                state.attempts += 1;
                self.store.set_failed_refreshes(state.attempts).await;
                if state.attempts >= self.policy.max_attempts {
                    self.store.clear().await;
                    state.phase = Phase::Failed;
                    self.signal.set(true);
                    telemetry::record_refresh("terminal");
                    error!(
                        attempts = state.attempts,
                        max_attempts = self.policy.max_attempts,
                        reason = err.label(),
                        error = %err,
                        "refresh attempts exhausted, credentials cleared"
                    );
                    RefreshResult::TerminallyFailed
                } else {
                    state.phase = Phase::Idle;
                    telemetry::record_refresh("failure");
                    warn!(
                        attempts = state.attempts,
                        max_attempts = self.policy.max_attempts,
                        reason = err.label(),
                        error = %err,
                        "token refresh failed"
                    );
                    RefreshResult::Failed(err)
                }
            }
        }
    }
}

async fn await_result(mut slot: ResultSlot) -> RefreshResult {
    let settled = match slot.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone(),
        Err(_) => None,
    };
    settled.unwrap_or_else(|| {
        RefreshResult::Failed(RefreshError::Generic(
            "refresh task ended without a result".into(),
        ))
    })
}
