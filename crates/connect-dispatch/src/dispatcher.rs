//! Request dispatcher
//!
//! Builds each attempt from the immutable descriptor plus the current
//! credential, sends it, and turns a 401 into at most one refresh and one
//! resend. The refresh decision belongs to the coordinator; this module only
//! reacts to its result.

use std::str::FromStr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use connect_auth::Credential;
use connect_session::{RefreshCoordinator, RefreshResult};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, info, instrument, warn};

use crate::descriptor::RequestDescriptor;
use crate::outcome::{ErrorKind, Outcome};
use crate::telemetry;

const UNAUTHORIZED: u16 = 401;

/// Raw response from one send attempt.
struct Received {
    status: u16,
    body: Bytes,
}

/// Executes API calls with the session's bearer credential.
pub struct RequestDispatcher {
    client: reqwest::Client,
    coordinator: RefreshCoordinator,
    timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(client: reqwest::Client, coordinator: RefreshCoordinator, timeout: Duration) -> Self {
        Self {
            client,
            coordinator,
            timeout,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send `request`, refreshing the credential once if it is rejected.
    #[instrument(skip_all, fields(request_id = %new_request_id(), method = %request.method(), path = %request.path()))]
    pub async fn dispatch(&self, request: &RequestDescriptor) -> Outcome {
        let started = Instant::now();
        let outcome = self.dispatch_inner(request).await;
        let duration = started.elapsed().as_secs_f64();
        telemetry::record_request(outcome.status(), duration);

        match &outcome {
            Outcome::Success { status, .. } => debug!(status, duration, "request succeeded"),
            Outcome::Failure { kind, status, .. } => {
                warn!(status = ?status, reason = kind.label(), duration, "request failed")
            }
        }
        outcome
    }

    async fn dispatch_inner(&self, request: &RequestDescriptor) -> Outcome {
        let credential = self.coordinator.store().get().await;

        let first = match self.send(request, &credential).await {
            Ok(received) => received,
            Err(outcome) => return outcome,
        };
        if first.status != UNAUTHORIZED {
            return Outcome::from_response(first.status, first.body);
        }

        info!("access token rejected, requesting refresh");
        let fresh = match self
            .coordinator
            .refresh_rejected(Some(&credential.access_token))
            .await
        {
            RefreshResult::Refreshed(fresh) => fresh,
            RefreshResult::Failed(err) => {
                warn!(reason = err.label(), error = %err, "refresh failed, failing request");
                return Outcome::failure(
                    ErrorKind::Unauthorized,
                    Some(first.status),
                    Some(first.body),
                );
            }
            RefreshResult::TerminallyFailed => {
                return Outcome::failure(ErrorKind::RefreshTokenFailed, Some(first.status), None);
            }
        };

        debug!("retrying with refreshed credential");
        let second = match self.send(request, &fresh).await {
            Ok(received) => received,
            Err(outcome) => return outcome,
        };
        if second.status == UNAUTHORIZED {
            warn!("refreshed credential rejected");
            return Outcome::failure(
                ErrorKind::Unauthorized,
                Some(second.status),
                Some(second.body),
            );
        }
        Outcome::from_response(second.status, second.body)
    }

    /// One attempt: headers from the descriptor and credential, then send and
    /// read the whole body. Transport errors come back as a finished outcome.
    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Received, Outcome> {
        let headers = build_headers(request, credential);

        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(error = %e, timeout = e.is_timeout(), "request failed to send");
            Outcome::failure(ErrorKind::Network(e.to_string()), None, None)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            error!(status, error = %e, "failed to read response body");
            Outcome::failure(ErrorKind::Network(e.to_string()), Some(status), None)
        })?;

        Ok(Received { status, body })
    }
}

/// Caller headers plus the credential's `Authorization` header.
///
/// Invalid caller headers are skipped. A caller-supplied `Authorization` is
/// never sent; the credential owns that header.
fn build_headers(request: &RequestDescriptor, credential: &Credential) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in request.headers() {
        let name = match HeaderName::from_str(name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == AUTHORIZATION {
            warn!("ignoring caller-supplied authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }

    match credential.authorization() {
        Some(auth) => match HeaderValue::from_str(&auth) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "credential is not a valid header value, sending without it"),
        },
        None => debug!("no credential available, sending without authorization"),
    }

    headers
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
