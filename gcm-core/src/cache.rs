//! Namespaced in-memory secret cache.
//!
//! A [`CacheRegistry`] owns one lock-protected map per namespace. Every
//! [`SecretCache`] built from the same registry and namespace sees the same
//! entries, so secrets written through one store are visible to the next
//! store created for that namespace during the process.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::model::{
    default_target_name, validate_namespace, validate_target_uri, Credential, ModelError,
    TargetNameFn,
};
use crate::store::Secret;
use crate::token::Token;

type Entries = Arc<Mutex<HashMap<String, Secret>>>;

/// Shared registry of per-namespace caches.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    namespaces: Arc<Mutex<HashMap<String, Entries>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry map for `namespace`, created on first use.
    fn entries(&self, namespace: &str) -> Entries {
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Number of namespaces that have been used.
    pub fn namespace_count(&self) -> usize {
        self.namespaces.lock().len()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("namespaces", &self.namespace_count())
            .finish()
    }
}

/// In-memory secrets for one namespace.
///
/// Keys are target names lower-cased, so lookups ignore case.
#[derive(Clone)]
pub struct SecretCache {
    namespace: String,
    target_name: TargetNameFn,
    entries: Entries,
}

impl SecretCache {
    pub fn new(registry: &CacheRegistry, namespace: &str) -> Result<Self, ModelError> {
        Self::with_target_name(registry, namespace, default_target_name())
    }

    /// Build a cache that derives keys with a custom strategy.
    pub fn with_target_name(
        registry: &CacheRegistry,
        namespace: &str,
        target_name: TargetNameFn,
    ) -> Result<Self, ModelError> {
        validate_namespace(namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            target_name,
            entries: registry.entries(namespace),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, target: &Url) -> Result<String, ModelError> {
        validate_target_uri(target)?;
        Ok((self.target_name)(target, &self.namespace).to_lowercase())
    }

    pub fn read_credentials(&self, target: &Url) -> Result<Option<Credential>, ModelError> {
        let key = self.key(target)?;
        Ok(self
            .entries
            .lock()
            .get(&key)
            .and_then(|s| s.as_credential().cloned()))
    }

    pub fn read_token(&self, target: &Url) -> Result<Option<Token>, ModelError> {
        let key = self.key(target)?;
        Ok(self.entries.lock().get(&key).and_then(|s| s.as_token().cloned()))
    }

    /// Insert or replace whatever is cached for `target`.
    pub fn write_credentials(&self, target: &Url, credentials: &Credential) -> Result<(), ModelError> {
        let key = self.key(target)?;
        self.entries
            .lock()
            .insert(key, Secret::Credential(credentials.clone()));
        Ok(())
    }

    /// Insert or replace whatever is cached for `target`.
    pub fn write_token(&self, target: &Url, token: &Token) -> Result<(), ModelError> {
        let key = self.key(target)?;
        self.entries.lock().insert(key, Secret::Token(token.clone()));
        Ok(())
    }

    /// Remove the entry only if it holds credentials.
    pub fn delete_credentials(&self, target: &Url) -> Result<(), ModelError> {
        let key = self.key(target)?;
        let mut entries = self.entries.lock();
        if matches!(entries.get(&key), Some(Secret::Credential(_))) {
            entries.remove(&key);
        }
        Ok(())
    }

    /// Remove the entry only if it holds a token.
    pub fn delete_token(&self, target: &Url) -> Result<(), ModelError> {
        let key = self.key(target)?;
        let mut entries = self.entries.lock();
        if matches!(entries.get(&key), Some(Secret::Token(_))) {
            entries.remove(&key);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("namespace", &self.namespace)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_caches_share_entries_per_namespace() {
        let registry = CacheRegistry::new();
        let first = SecretCache::new(&registry, "git").unwrap();
        let second = SecretCache::new(&registry, "git").unwrap();
        let other = SecretCache::new(&registry, "ada").unwrap();

        let target = url("https://example.visualstudio.com/");
        first
            .write_credentials(&target, &Credential::new("u", "p"))
            .unwrap();

        assert_eq!(
            second.read_credentials(&target).unwrap(),
            Some(Credential::new("u", "p"))
        );
        assert!(other.read_credentials(&target).unwrap().is_none());
        assert_eq!(registry.namespace_count(), 2);
    }

    #[test]
    fn test_separate_registries_are_isolated() {
        let target = url("https://example.com/");
        let one = SecretCache::new(&CacheRegistry::new(), "git").unwrap();
        let two = SecretCache::new(&CacheRegistry::new(), "git").unwrap();

        one.write_token(&target, &Token::new("t", TokenType::Personal))
            .unwrap();
        assert!(two.read_token(&target).unwrap().is_none());
    }

    #[test]
    fn test_keys_ignore_case() {
        let cache = SecretCache::new(&CacheRegistry::new(), "git").unwrap();
        cache
            .write_credentials(&url("https://Example.COM/"), &Credential::new("u", "p"))
            .unwrap();
        assert!(cache
            .read_credentials(&url("https://example.com/"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_read_requires_matching_kind() {
        let cache = SecretCache::new(&CacheRegistry::new(), "git").unwrap();
        let target = url("https://example.com/");
        cache
            .write_token(&target, &Token::new("t", TokenType::Refresh))
            .unwrap();

        assert!(cache.read_credentials(&target).unwrap().is_none());
        assert!(cache.read_token(&target).unwrap().is_some());
    }

    #[test]
    fn test_write_overwrites_either_kind() {
        let cache = SecretCache::new(&CacheRegistry::new(), "git").unwrap();
        let target = url("https://example.com/");
        cache
            .write_token(&target, &Token::new("t", TokenType::Refresh))
            .unwrap();
        cache
            .write_credentials(&target, &Credential::new("u", "p"))
            .unwrap();

        assert!(cache.read_token(&target).unwrap().is_none());
        assert!(cache.read_credentials(&target).unwrap().is_some());
    }

    #[test]
    fn test_delete_only_removes_matching_kind() {
        let cache = SecretCache::new(&CacheRegistry::new(), "git").unwrap();
        let target = url("https://example.com/");
        cache
            .write_credentials(&target, &Credential::new("u", "p"))
            .unwrap();

        cache.delete_token(&target).unwrap();
        assert!(cache.read_credentials(&target).unwrap().is_some());

        cache.delete_credentials(&target).unwrap();
        assert!(cache.read_credentials(&target).unwrap().is_none());
        cache.delete_credentials(&target).unwrap();
    }

    #[test]
    fn test_rejects_bad_namespace_and_relative_uri() {
        let registry = CacheRegistry::new();
        assert!(SecretCache::new(&registry, " ").is_err());
        assert!(SecretCache::new(&registry, "a:b").is_err());

        let cache = SecretCache::new(&registry, "git").unwrap();
        assert!(matches!(
            cache.read_token(&url("mailto:someone@example.com")),
            Err(ModelError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_custom_target_name() {
        let registry = CacheRegistry::new();
        let cache = SecretCache::with_target_name(
            &registry,
            "git",
            Arc::new(|target: &Url, namespace: &str| {
                format!("{}|{}", namespace, target.host_str().unwrap_or_default())
            }),
        )
        .unwrap();

        let a = url("https://example.com/a");
        let b = url("http://example.com:8080/b");
        cache.write_credentials(&a, &Credential::new("u", "p")).unwrap();
        assert!(cache.read_credentials(&b).unwrap().is_some());
    }
}
