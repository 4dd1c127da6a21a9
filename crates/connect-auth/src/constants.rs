//! Authorization server constants
//!
//! The token path and grant parameters are fixed by the identity service. The
//! host (`signin_url`) and client credentials vary per environment and come
//! from configuration.

/// Token endpoint path, relative to the environment's sign-in URL
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Grant type for the refresh exchange
pub const GRANT_TYPE_REFRESH: &str = "refresh_token";

/// Token type assumed when neither the server nor the stored credential names one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Scheme for the client-credential header on the token endpoint
pub const BASIC_SCHEME: &str = "Basic";
