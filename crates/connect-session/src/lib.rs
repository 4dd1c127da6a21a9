//! Session state for the authenticated request pipeline
//!
//! Owns the refresh state machine that sits between request dispatch and the
//! token endpoint. One `RefreshCoordinator` is shared by every request path.
//!
//! Session lifecycle:
//! 1. Login installs a credential → coordinator `Idle`, signal cleared
//! 2. A request is rejected with 401 → first caller starts a refresh, later
//!    callers join it (`Refreshing`)
//! 3. Refresh succeeds → store updated, failure count reset
//! 4. Refresh fails → failure counted; the next 401 may try again
//! 5. Failure count reaches the bound → store cleared, `FailureSignal` raised,
//!    coordinator `Failed` until a new credential is installed

pub mod coordinator;
pub mod signal;
pub mod telemetry;

pub use coordinator::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_REFRESH_TIMEOUT, RefreshCoordinator, RefreshResult, RetryPolicy,
};
pub use signal::FailureSignal;
