//! Top-level error type for the credential manager.

use thiserror::Error;

use crate::authentication::AuthenticationError;
use crate::authority::AuthorityError;
use crate::config::ConfigError;
use crate::model::ModelError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Any error the library can produce.
#[derive(Debug, Error)]
pub enum GcmError {
    /// Error from reading git configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An argument violated its contract.
    #[error("invalid argument: {0}")]
    Model(#[from] ModelError),

    /// Error from token validation or parsing.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Error from secret storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error talking to an identity authority.
    #[error("authority error: {0}")]
    Authority(#[from] AuthorityError),

    /// Error resolving credentials.
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthenticationError),
}
