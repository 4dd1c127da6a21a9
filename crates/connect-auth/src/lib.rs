//! Vehicle-connect credential and token library
//!
//! Holds the bearer credential used by every API call and performs the
//! refresh-token exchange against the authorization server. The crate knows
//! nothing about retry policy or request dispatch; the session crate drives
//! it.
//!
//! Credential flow:
//! 1. The login front channel produces the first `Credential`
//! 2. It is installed into a `CredentialStore` (memory or file backed)
//! 3. On a rejected access token, `TokenRefreshClient::refresh()` exchanges
//!    the refresh token for a `TokenResponse`
//! 4. `TokenResponse::into_credential()` folds the response into the previous
//!    credential, keeping the refresh token when the server does not rotate it

pub mod constants;
pub mod credentials;
pub mod error;
pub mod file_store;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore, MemoryCredentialStore, StoreFuture, now_millis};
pub use error::{Error, RefreshError, Result};
pub use file_store::FileCredentialStore;
pub use token::{ClientCredentials, HttpTokenRefreshClient, TokenRefreshClient, TokenResponse};
