//! Backing secure storage.
//!
//! This module provides:
//! - [`Secret`] - The credential-or-token union held by stores and caches
//! - [`SecureStore`] - Trait for durable storage backends keyed by target name
//! - [`MemoryStore`] - In-memory implementation for tests and transient sources
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`FileStore`] - Plain XML file, used only when the keyring is unavailable
//! - [`create_store`] - Backend selection with insecure-file migration
//!
//! # Storage Key Convention
//!
//! Backends receive fully derived target names such as
//! `git:https://account.visualstudio.com`; they never see URIs.
//!
//! # Example
//!
//! ```rust,ignore
//! use gcm_core::store::{SecureStore, MemoryStore};
//! use gcm_core::Credential;
//!
//! let store = MemoryStore::new();
//! store.write_credentials("git:https://example.com", &Credential::new("me", "pw")).await?;
//! let found = store.read_credentials("git:https://example.com").await?;
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Credential, ModelError};
use crate::token::{Token, TokenError};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// Service name prefix for entries written to the OS keyring.
pub const KEYRING_SERVICE_PREFIX: &str = "gcm4ml";

/// A stored secret: either a credential or a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secret {
    Credential(Credential),
    Token(Token),
}

impl Secret {
    pub fn as_credential(&self) -> Option<&Credential> {
        match self {
            Secret::Credential(credential) => Some(credential),
            Secret::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Secret::Token(token) => Some(token),
            Secret::Credential(_) => None,
        }
    }
}

/// Error type for secure store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The backing file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing XML document is malformed.
    #[error("xml error: {message}")]
    Xml { message: String },

    /// A target, namespace or credential failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A token failed validation.
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Durable storage for credentials and tokens, keyed by target name.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
/// - [`FileStore`] - Insecure XML file
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Retrieve credentials. Returns `Ok(None)` if none are stored.
    async fn read_credentials(&self, target_name: &str) -> Result<Option<Credential>, StoreError>;

    /// Store credentials, overwriting any existing value.
    async fn write_credentials(
        &self,
        target_name: &str,
        credentials: &Credential,
    ) -> Result<(), StoreError>;

    /// Retrieve a token. Returns `Ok(None)` if none is stored.
    async fn read_token(&self, target_name: &str) -> Result<Option<Token>, StoreError>;

    /// Store a token, overwriting any existing value.
    async fn write_token(&self, target_name: &str, token: &Token) -> Result<(), StoreError>;

    /// Delete whatever is stored under the target name.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn delete(&self, target_name: &str) -> Result<(), StoreError>;
}

/// Select the backing store for this process.
///
/// # Backend Selection Logic
///
/// - If the OS keyring is available it is used. A leftover insecure file is
///   migrated into the keyring and disabled, unless falling back to it is
///   still allowed.
/// - If the keyring is unavailable and `can_fall_back` is set, the insecure
///   file at `insecure_path` is used.
/// - Otherwise selection fails.
pub async fn create_store(
    insecure_path: &Path,
    can_fall_back: bool,
) -> Result<Arc<dyn SecureStore>, StoreError> {
    #[cfg(feature = "keyring-store")]
    match KeyringStore::try_new(KEYRING_SERVICE_PREFIX) {
        Ok(keyring) => {
            tracing::debug!("using OS keyring for secret storage");
            if insecure_path.is_file() {
                if can_fall_back {
                    tracing::debug!("insecure store found, fallback requested, skipping migration");
                } else {
                    tracing::info!("migrating insecure store {} into the keyring", insecure_path.display());
                    FileStore::open(insecure_path)?
                        .migrate_and_disable(&keyring)
                        .await?;
                }
            }
            return Ok(Arc::new(keyring));
        }
        Err(e) => {
            tracing::warn!("keyring unavailable ({})", e);
        }
    }

    if !can_fall_back {
        return Err(StoreError::KeyringUnavailable {
            message: "the OS keyring is not available; to use the insecure store instead run \
                      `git config --global credential.canFallBackToInsecureStore true`"
                .to_string(),
        });
    }

    tracing::warn!(
        "using the insecure store at {}; secrets are saved in plain text",
        insecure_path.display()
    );
    if let Some(parent) = insecure_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(FileStore::open(insecure_path)?))
}
