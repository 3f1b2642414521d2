//! Domain model types for the credential manager.
//!
//! This module defines the core types used throughout the crate:
//! - [`Credential`] - A username/password pair supplied by the user or derived from a token
//! - [`AuthorityType`] - Which identity authority backs a remote host
//! - [`Interactivity`] - Whether the user may be prompted
//! - [`TargetNameFn`] - Strategy mapping a resource URI and namespace to a storage key
//! - [`ModelError`] - Argument errors raised by validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Longest password (or token value) accepted for storage.
pub const PASSWORD_MAX_LENGTH: usize = 2047;

/// Longest username accepted for storage.
pub const USERNAME_MAX_LENGTH: usize = 511;

/// Characters that would corrupt a backing store's own key scheme.
pub const ILLEGAL_NAMESPACE_CHARACTERS: [char; 9] = [':', ';', '\\', '?', '@', '=', '&', '%', '$'];

/// Argument errors raised when a value or identifier violates its contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The target URI is not an absolute URI with a host.
    #[error("target uri is not absolute: {uri}")]
    InvalidUri { uri: String },

    /// The namespace is blank or contains an illegal character.
    #[error("invalid namespace: {namespace:?}")]
    InvalidNamespace { namespace: String },

    /// A field exceeds its maximum length.
    #[error("the {field} cannot be longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// A value failed to parse.
    #[error("invalid {kind} value: {value:?}")]
    InvalidValue { kind: &'static str, value: String },
}

/// Credentials for a remote resource.
///
/// Equality compares both fields. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    /// Create a credential from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// An empty credential, used by integrated (NTLM/Kerberos) authentication.
    pub fn empty() -> Self {
        Self::new(String::new(), String::new())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Expose the password. Never log the result.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Check the length limits enforced before anything is persisted.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.password.chars().count() > PASSWORD_MAX_LENGTH {
            return Err(ModelError::TooLong {
                field: "password",
                max: PASSWORD_MAX_LENGTH,
            });
        }
        if self.username.chars().count() > USERNAME_MAX_LENGTH {
            return Err(ModelError::TooLong {
                field: "username",
                max: USERNAME_MAX_LENGTH,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The identity authority backing a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthorityType {
    /// Detect the authority with a probe request; falls back to [`AuthorityType::Basic`].
    #[default]
    Auto,
    /// Plain username/password stored as given.
    Basic,
    /// Microsoft Account (Live) backed Azure DevOps.
    MicrosoftAccount,
    /// Azure Active Directory backed Azure DevOps.
    AzureDirectory,
    /// NTLM/Kerberos; git negotiates with an empty credential.
    Integrated,
    /// Reserved.
    GitHub,
}

impl AuthorityType {
    /// Map a `credential.authority` configuration value to an authority.
    ///
    /// Unrecognized values select [`AuthorityType::Basic`].
    pub fn from_config_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "msa" | "microsoft" | "microsoftaccount" | "live" | "liveconnect" | "liveid" => {
                Self::MicrosoftAccount
            }
            "aad" | "azure" | "azuredirectory" => Self::AzureDirectory,
            "integrated" | "ntlm" | "kerberos" | "sso" => Self::Integrated,
            "github" => Self::GitHub,
            "auto" => Self::Auto,
            _ => Self::Basic,
        }
    }
}

impl fmt::Display for AuthorityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "Auto",
            Self::Basic => "Basic",
            Self::MicrosoftAccount => "MicrosoftAccount",
            Self::AzureDirectory => "AzureDirectory",
            Self::Integrated => "Integrated",
            Self::GitHub => "GitHub",
        };
        f.write_str(name)
    }
}

/// Whether the user may be prompted during credential resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interactivity {
    /// Prompt only when nothing cached or refreshable works.
    #[default]
    Auto,
    /// Always prompt, ignoring cached and refreshable credentials.
    Always,
    /// Never prompt.
    Never,
}

impl Interactivity {
    /// Map a `credential.interactive` configuration value.
    pub fn from_config_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" | "true" | "force" => Self::Always,
            "never" | "false" => Self::Never,
            _ => Self::Auto,
        }
    }
}

impl FromStr for Interactivity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            _ => Err(ModelError::InvalidValue {
                kind: "interactivity",
                value: s.to_string(),
            }),
        }
    }
}

/// Parse a git-style boolean (`true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Strategy mapping `(target uri, namespace)` to the key secrets are stored under.
pub type TargetNameFn = Arc<dyn Fn(&Url, &str) -> String + Send + Sync>;

/// Default target name: `{namespace}:{scheme}://{host}[:{port}]`.
///
/// The port is only included when it differs from the scheme's default,
/// so `https://host` and `https://host:443` map to the same key.
pub fn uri_to_target_name(target: &Url, namespace: &str) -> String {
    let host = target
        .host_str()
        .unwrap_or_default()
        .trim_end_matches(&['/', '\\'][..]);

    match target.port() {
        Some(port) => format!("{}:{}://{}:{}", namespace, target.scheme(), host, port),
        None => format!("{}:{}://{}", namespace, target.scheme(), host),
    }
}

/// The default [`TargetNameFn`].
pub fn default_target_name() -> TargetNameFn {
    Arc::new(uri_to_target_name)
}

/// Require an absolute URI that names a host.
pub fn validate_target_uri(target: &Url) -> Result<(), ModelError> {
    if target.cannot_be_a_base() || !target.has_host() {
        return Err(ModelError::InvalidUri {
            uri: target.to_string(),
        });
    }
    Ok(())
}

/// Require a non-blank namespace free of [`ILLEGAL_NAMESPACE_CHARACTERS`].
pub fn validate_namespace(namespace: &str) -> Result<(), ModelError> {
    if namespace.trim().is_empty() || namespace.contains(&ILLEGAL_NAMESPACE_CHARACTERS[..]) {
        return Err(ModelError::InvalidNamespace {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_target_name_format() {
        let name = uri_to_target_name(&url("https://account.visualstudio.com/"), "git");
        assert_eq!(name, "git:https://account.visualstudio.com");
    }

    #[test]
    fn test_target_name_is_deterministic() {
        let target = url("https://example.visualstudio.com/DefaultCollection/_git/repo");
        assert_eq!(
            uri_to_target_name(&target, "git"),
            uri_to_target_name(&target, "git")
        );
    }

    #[test]
    fn test_target_name_default_port_matches_omitted_port() {
        let explicit = uri_to_target_name(&url("https://example.com:443/"), "git");
        let omitted = uri_to_target_name(&url("https://example.com/"), "git");
        assert_eq!(explicit, omitted);
    }

    #[test]
    fn test_target_name_differs_by_port() {
        let a = uri_to_target_name(&url("http://example.com:8080/"), "git");
        let b = uri_to_target_name(&url("http://example.com:8081/"), "git");
        assert_ne!(a, b);
        assert_eq!(a, "git:http://example.com:8080");
    }

    #[test]
    fn test_target_name_ignores_path() {
        let a = uri_to_target_name(&url("https://example.com/one"), "ada");
        let b = uri_to_target_name(&url("https://example.com/two/"), "ada");
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("git").is_ok());
        assert!(validate_namespace("ada").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("   ").is_err());
        for c in ILLEGAL_NAMESPACE_CHARACTERS {
            let namespace = format!("bad{}name", c);
            assert!(validate_namespace(&namespace).is_err(), "accepted {:?}", namespace);
        }
    }

    #[test]
    fn test_validate_target_uri() {
        assert!(validate_target_uri(&url("https://example.com/")).is_ok());
        assert!(validate_target_uri(&url("mailto:someone@example.com")).is_err());
    }

    #[test]
    fn test_credential_validate_lengths() {
        let ok = Credential::new("user", "p".repeat(PASSWORD_MAX_LENGTH));
        assert!(ok.validate().is_ok());

        let long_password = Credential::new("user", "p".repeat(PASSWORD_MAX_LENGTH + 1));
        assert_eq!(
            long_password.validate(),
            Err(ModelError::TooLong {
                field: "password",
                max: PASSWORD_MAX_LENGTH
            })
        );

        let long_username = Credential::new("u".repeat(USERNAME_MAX_LENGTH + 1), "secret");
        assert!(long_username.validate().is_err());
    }

    #[test]
    fn test_credential_debug_redacted() {
        let credential = Credential::new("alice", "hunter2");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_authority_from_config_value() {
        assert_eq!(AuthorityType::from_config_value("MSA"), AuthorityType::MicrosoftAccount);
        assert_eq!(AuthorityType::from_config_value("LiveID"), AuthorityType::MicrosoftAccount);
        assert_eq!(AuthorityType::from_config_value("Azure"), AuthorityType::AzureDirectory);
        assert_eq!(AuthorityType::from_config_value("NTLM"), AuthorityType::Integrated);
        assert_eq!(AuthorityType::from_config_value("kerberos"), AuthorityType::Integrated);
        assert_eq!(AuthorityType::from_config_value("whatever"), AuthorityType::Basic);
    }

    #[test]
    fn test_interactivity_from_config_value() {
        assert_eq!(Interactivity::from_config_value("force"), Interactivity::Always);
        assert_eq!(Interactivity::from_config_value("FALSE"), Interactivity::Never);
        assert_eq!(Interactivity::from_config_value("maybe"), Interactivity::Auto);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("sometimes"), None);
    }
}
