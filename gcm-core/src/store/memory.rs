//! Process-local secret storage.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Secret, SecureStore, StoreError};
use crate::model::Credential;
use crate::token::Token;

/// Secrets held in a map for the lifetime of the process.
///
/// Used where no keyring is wanted: tests, and as a federated token source
/// filled by the embedding application.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `entries` already stored, keyed by target name.
    pub fn with_data(entries: HashMap<String, Secret>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup(&self, target_name: &str) -> Option<Secret> {
        self.entries.read().get(target_name).cloned()
    }

    fn put(&self, target_name: &str, secret: Secret) {
        self.entries.write().insert(target_name.to_string(), secret);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn read_credentials(&self, target_name: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .lookup(target_name)
            .and_then(|s| s.as_credential().cloned()))
    }

    async fn write_credentials(
        &self,
        target_name: &str,
        credentials: &Credential,
    ) -> Result<(), StoreError> {
        self.put(target_name, Secret::Credential(credentials.clone()));
        Ok(())
    }

    async fn read_token(&self, target_name: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.lookup(target_name).and_then(|s| s.as_token().cloned()))
    }

    async fn write_token(&self, target_name: &str, token: &Token) -> Result<(), StoreError> {
        self.put(target_name, Secret::Token(token.clone()));
        Ok(())
    }

    async fn delete(&self, target_name: &str) -> Result<(), StoreError> {
        self.entries.write().remove(target_name);
        Ok(())
    }
}
