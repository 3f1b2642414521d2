//! Namespaced secret storage with a write-through cache.
//!
//! [`SecretStore`] fronts a durable [`SecureStore`] with a [`SecretCache`]
//! drawn from a shared [`CacheRegistry`]:
//!
//! - writes go to the backing store first, and only reach the cache when the
//!   backing write succeeded
//! - reads consult the cache, then the backing store; a backing hit is
//!   returned without being copied into the cache
//! - deletes are best effort against the backing store and always clear the
//!   cache

use std::sync::Arc;
use url::Url;

use crate::cache::{CacheRegistry, SecretCache};
use crate::model::{
    default_target_name, validate_namespace, validate_target_uri, Credential, TargetNameFn,
};
use crate::store::{SecureStore, StoreError};
use crate::token::Token;

/// Credentials and tokens for one namespace.
#[derive(Clone)]
pub struct SecretStore {
    namespace: String,
    target_name: TargetNameFn,
    backing: Arc<dyn SecureStore>,
    cache: SecretCache,
}

impl SecretStore {
    pub fn new(
        backing: Arc<dyn SecureStore>,
        registry: &CacheRegistry,
        namespace: &str,
    ) -> Result<Self, StoreError> {
        Self::with_target_name(backing, registry, namespace, default_target_name())
    }

    /// Build a store that derives keys with a custom strategy.
    pub fn with_target_name(
        backing: Arc<dyn SecureStore>,
        registry: &CacheRegistry,
        namespace: &str,
        target_name: TargetNameFn,
    ) -> Result<Self, StoreError> {
        validate_namespace(namespace)?;
        let cache = SecretCache::with_target_name(registry, namespace, target_name.clone())?;
        Ok(Self {
            namespace: namespace.to_string(),
            target_name,
            backing,
            cache,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The key secrets for `target` are stored under.
    pub fn target_name(&self, target: &Url) -> String {
        (self.target_name)(target, &self.namespace)
    }

    fn checked_target_name(&self, target: &Url) -> Result<String, StoreError> {
        validate_target_uri(target)?;
        Ok(self.target_name(target))
    }

    pub async fn read_credentials(&self, target: &Url) -> Result<Option<Credential>, StoreError> {
        let target_name = self.checked_target_name(target)?;
        if let Some(credentials) = self.cache.read_credentials(target)? {
            return Ok(Some(credentials));
        }
        self.backing.read_credentials(&target_name).await
    }

    pub async fn write_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<(), StoreError> {
        let target_name = self.checked_target_name(target)?;
        credentials.validate()?;

        self.backing
            .write_credentials(&target_name, credentials)
            .await?;
        self.cache.write_credentials(target, credentials)?;
        tracing::debug!("stored credentials for {}", target_name);
        Ok(())
    }

    pub async fn delete_credentials(&self, target: &Url) -> Result<(), StoreError> {
        let target_name = self.checked_target_name(target)?;
        if let Err(e) = self.backing.delete(&target_name).await {
            tracing::warn!("failed to delete credentials for {}: {}", target_name, e);
        }
        self.cache.delete_credentials(target)?;
        Ok(())
    }

    pub async fn read_token(&self, target: &Url) -> Result<Option<Token>, StoreError> {
        let target_name = self.checked_target_name(target)?;
        if let Some(token) = self.cache.read_token(target)? {
            return Ok(Some(token));
        }
        self.backing.read_token(&target_name).await
    }

    pub async fn write_token(&self, target: &Url, token: &Token) -> Result<(), StoreError> {
        let target_name = self.checked_target_name(target)?;
        token.validate()?;

        self.backing.write_token(&target_name, token).await?;
        self.cache.write_token(target, token)?;
        tracing::debug!("stored {} for {}", token.token_type(), target_name);
        Ok(())
    }

    pub async fn delete_token(&self, target: &Url) -> Result<(), StoreError> {
        let target_name = self.checked_target_name(target)?;
        if let Err(e) = self.backing.delete(&target_name).await {
            tracing::warn!("failed to delete token for {}: {}", target_name, e);
        }
        self.cache.delete_token(target)?;
        Ok(())
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}
