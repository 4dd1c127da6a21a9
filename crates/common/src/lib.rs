//! Shared types for the vehicle-connect workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
