//! # gcm-core
//!
//! Credential resolution and secret storage for the git credential manager.
//!
//! This crate provides:
//! - Value types for credentials and tokens, with the keychain token codec
//! - A git configuration reader with host-hierarchical lookup
//! - Namespaced secret storage over the OS keyring or an insecure XML file,
//!   fronted by a shared in-memory cache
//! - An Azure authority client issuing OAuth2 and personal access tokens
//! - The authentication cascade that answers git's credential requests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gcm_core::{Authentication, AuthenticationFactory, CacheRegistry, CredentialPolicy};
//! use gcm_core::{AuthorityType, MemoryStore};
//! use std::sync::Arc;
//!
//! let factory = AuthenticationFactory::new(Arc::new(MemoryStore::new()), CacheRegistry::new());
//! let target = url::Url::parse("https://account.visualstudio.com/")?;
//! let auth = Authentication::for_authority(AuthorityType::Auto, &target, &factory).await?;
//! let credentials = auth.get_credentials(&target, CredentialPolicy::default()).await?;
//! ```

pub mod authentication;
pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod locate;
pub mod model;
pub mod secret_store;
pub mod store;
pub mod token;

// Re-export commonly used types at crate root
pub use model::{
    AuthorityType,
    Credential,
    Interactivity,
    ModelError,
    TargetNameFn,
};

pub use token::{
    Token,
    TokenError,
    TokenPair,
    TokenType,
};

pub use config::{
    ConfigError,
    Configuration,
    Entry,
};

pub use cache::{
    CacheRegistry,
    SecretCache,
};

pub use secret_store::SecretStore;

pub use store::{
    create_store,
    FileStore,
    MemoryStore,
    Secret,
    SecureStore,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use authority::{
    AuthorityError,
    DeviceAuthorization,
    UserAgent,
    VsoAuthority,
    VsoAzureAuthority,
    VsoTokenScope,
};

pub use authentication::{
    Authentication,
    AuthenticationError,
    AuthenticationFactory,
    CredentialPolicy,
};

pub use error::GcmError;
