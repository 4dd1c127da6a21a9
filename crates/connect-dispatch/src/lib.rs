//! Authenticated request dispatch
//!
//! Sends API calls with the current bearer credential and recovers from an
//! expired access token exactly once per call:
//!
//! 1. Attach `Authorization: <token_type> <access_token>` and send
//! 2. On 401, ask the `RefreshCoordinator` for a fresh credential
//! 3. Refreshed → resend once with the new header; anything else → fail the call
//!
//! Non-401 responses are never retried.

pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod telemetry;

pub use descriptor::RequestDescriptor;
pub use dispatcher::RequestDispatcher;
pub use error::{Error, Result};
pub use outcome::{ErrorKind, Outcome};
