//! OS keyring-backed secure storage implementation.

use async_trait::async_trait;
use keyring::Entry;
use zeroize::Zeroizing;

use super::{SecureStore, StoreError};
use crate::authentication::{
    FEDERATED_TOKEN_NAMESPACE, PERSONAL_ACCESS_TOKEN_NAMESPACE, REFRESH_TOKEN_NAMESPACE,
};
use crate::model::Credential;
use crate::token::{Token, TokenType};

const CREDENTIAL_USER: &str = "credential";
const TOKEN_USER: &str = "token";
const AVAILABILITY_CHECK_VALUE: &str = "gcm-availability-check";

/// OS keyring-backed secure store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service, fronted by the persistent keyutils cache
/// - Windows: Credential Manager
///
/// # Storage Key Format
///
/// Each target name maps to the service `{service_name}:{target_name}`.
/// Credentials live under the user `credential` as JSON; tokens live under
/// the user `token` in the binary token format.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Writes, reads back and deletes a throwaway entry, so a backend that
    /// accepts entries but cannot hold them counts as unavailable.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let unavailable = |e: keyring::Error| StoreError::KeyringUnavailable {
            message: format!("keyring backend not available: {}", e),
        };

        let service = format!("{}:__availability_check__", service_name);
        let entry = Entry::new(&service, CREDENTIAL_USER).map_err(unavailable)?;
        entry
            .set_password(AVAILABILITY_CHECK_VALUE)
            .map_err(unavailable)?;
        let read = entry.get_password().map_err(unavailable);
        if let Err(e) = entry.delete_credential() {
            tracing::debug!("failed to remove keyring availability entry: {}", e);
        }
        if read? != AVAILABILITY_CHECK_VALUE {
            return Err(StoreError::KeyringUnavailable {
                message: "keyring backend did not return the value written to it".to_string(),
            });
        }

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn create_entry(&self, target_name: &str, user: &str) -> Result<Entry, StoreError> {
        let service = format!("{}:{}", self.service_name, target_name);
        Entry::new(&service, user).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }

    fn delete_entry(&self, target_name: &str, user: &str) -> Result<(), StoreError> {
        match self.create_entry(target_name, user)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}

/// The token type stored under a target name's namespace.
///
/// Unknown namespaces trust the payload's own type field.
fn expected_token_type(target_name: &str, bytes: &[u8]) -> TokenType {
    let namespace = target_name.split_once(':').map(|(namespace, _)| namespace);
    match namespace {
        Some(REFRESH_TOKEN_NAMESPACE) => TokenType::Refresh,
        Some(FEDERATED_TOKEN_NAMESPACE) => TokenType::Federated,
        Some(PERSONAL_ACCESS_TOKEN_NAMESPACE) => TokenType::Personal,
        _ => Token::peek_type(bytes).unwrap_or(TokenType::Unknown),
    }
}

fn decode_token(target_name: &str, bytes: &[u8]) -> Option<Token> {
    Token::deserialize(bytes, expected_token_type(target_name, bytes))
}

fn map_read_error(target_name: &str, error: keyring::Error) -> StoreError {
    match error {
        keyring::Error::Ambiguous(_) => StoreError::BackendError {
            message: format!("ambiguous keyring entry for {}", target_name),
        },
        keyring::Error::PlatformFailure(e) => StoreError::BackendError {
            message: format!("platform keyring failure: {}", e),
        },
        e => StoreError::BackendError {
            message: format!("keyring error: {}", e),
        },
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn read_credentials(&self, target_name: &str) -> Result<Option<Credential>, StoreError> {
        let entry = self.create_entry(target_name, CREDENTIAL_USER)?;

        match entry.get_password() {
            Ok(json) => {
                let json = Zeroizing::new(json);
                Ok(Some(serde_json::from_str(&json)?))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_read_error(target_name, e)),
        }
    }

    async fn write_credentials(
        &self,
        target_name: &str,
        credentials: &Credential,
    ) -> Result<(), StoreError> {
        let entry = self.create_entry(target_name, CREDENTIAL_USER)?;
        let json = Zeroizing::new(serde_json::to_string(credentials)?);

        entry
            .set_password(&json)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn read_token(&self, target_name: &str) -> Result<Option<Token>, StoreError> {
        let entry = self.create_entry(target_name, TOKEN_USER)?;

        match entry.get_secret() {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                Ok(decode_token(target_name, &bytes))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_read_error(target_name, e)),
        }
    }

    async fn write_token(&self, target_name: &str, token: &Token) -> Result<(), StoreError> {
        let entry = self.create_entry(target_name, TOKEN_USER)?;
        let bytes = Zeroizing::new(token.serialize());

        entry
            .set_secret(&bytes)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring secret: {}", e),
            })
    }

    async fn delete(&self, target_name: &str) -> Result<(), StoreError> {
        self.delete_entry(target_name, CREDENTIAL_USER)?;
        self.delete_entry(target_name, TOKEN_USER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests skip themselves where no keyring daemon is running.

    fn unique_target(label: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("gcm-test:https://{}-{}.example.com", label, nanos)
    }

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("gcm-test") {
            Ok(store) => assert_eq!(store.service_name, "gcm-test"),
            Err(StoreError::KeyringUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_token_round_trip() {
        let Ok(store) = KeyringStore::try_new("gcm-test") else {
            return;
        };
        let target = unique_target("token");
        let token = Token::new("refresh-value", TokenType::Refresh)
            .with_target_identity(uuid::Uuid::new_v4());

        if store.write_token(&target, &token).await.is_err() {
            eprintln!("keyring write failed, skipping");
            return;
        }

        match store.read_token(&target).await {
            Ok(Some(read)) => assert_eq!(read, token),
            Ok(None) | Err(_) => eprintln!("keyring did not persist the token, skipping"),
        }

        let _ = store.delete(&target).await;
    }

    #[test]
    fn test_short_legacy_token_takes_namespace_type() {
        let token = decode_token("ada:https://account.visualstudio.com", b"legacy-refresh").unwrap();
        assert_eq!(token.token_type(), TokenType::Refresh);
        assert_eq!(token.value(), "legacy-refresh");
        assert!(token.target_identity().is_nil());

        let token = decode_token("registry:https://account.visualstudio.com", b"fed").unwrap();
        assert_eq!(token.token_type(), TokenType::Federated);
    }

    #[test]
    fn test_structured_token_under_its_namespace() {
        let stored = Token::new("pat-value", TokenType::Personal)
            .with_target_identity(uuid::Uuid::new_v4());
        let read = decode_token("git:https://account.visualstudio.com", &stored.serialize());
        assert_eq!(read, Some(stored));
    }

    #[test]
    fn test_structured_token_of_another_type_is_read_raw() {
        let bytes = Token::new("pat-value", TokenType::Personal).serialize();
        let read = decode_token("ada:https://account.visualstudio.com", &bytes).unwrap();

        assert_eq!(read.token_type(), TokenType::Refresh);
        assert_eq!(read.value().len(), bytes.len());
        assert!(read.target_identity().is_nil());
    }

    #[test]
    fn test_unknown_namespace_uses_payload_type() {
        let stored = Token::new("value", TokenType::Access);
        assert_eq!(
            decode_token("gcm-test:https://example.com", &stored.serialize()),
            Some(stored)
        );
    }

    #[tokio::test]
    async fn test_keyring_get_nonexistent() {
        let Ok(store) = KeyringStore::try_new("gcm-test") else {
            return;
        };
        if let Ok(found) = store.read_credentials(&unique_target("absent")).await {
            assert!(found.is_none());
        }
    }
}
