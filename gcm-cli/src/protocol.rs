//! The git credential helper protocol.
//!
//! git writes `key=value` lines terminated by a blank line (or end of input)
//! to the helper's stdin, and reads the same format back from stdout.

use anyhow::{Context, Result};
use gcm_core::model::parse_bool;
use gcm_core::{AuthorityType, Configuration, Credential, Interactivity};
use std::fmt;
use std::io::BufRead;
use url::Url;

/// Prefix of every configuration key the helper reads.
pub const CONFIG_PREFIX: &str = "credential";

/// Configuration key allowing the plain-text store when no keyring exists.
pub const CAN_FALL_BACK_TO_INSECURE_STORE: &str = "canFallBackToInsecureStore";

/// What git sent, plus the policy resolved for its target.
#[derive(Clone, PartialEq, Eq)]
pub struct OperationArguments {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub authority: AuthorityType,
    pub interactivity: Interactivity,
    pub validate_credentials: bool,
    pub write_log: bool,
    pub can_fall_back_to_insecure_store: bool,
}

impl Default for OperationArguments {
    fn default() -> Self {
        Self {
            protocol: None,
            host: None,
            path: None,
            username: None,
            password: None,
            authority: AuthorityType::Auto,
            interactivity: Interactivity::Auto,
            validate_credentials: true,
            write_log: false,
            can_fall_back_to_insecure_store: false,
        }
    }
}

impl OperationArguments {
    /// Read attributes until a blank line or end of input.
    ///
    /// Lines without `=` and unknown keys are ignored; values may contain `=`.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut args = Self::default();

        for line in reader.lines() {
            let line = line.context("failed to read from stdin")?;
            if line.trim().is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = Some(value.to_string());
            match key {
                "protocol" => args.protocol = value,
                "host" => args.host = value,
                "path" => args.path = value,
                "username" => args.username = value,
                "password" => args.password = value,
                _ => tracing::debug!("ignoring attribute {}", key),
            }
        }

        Ok(args)
    }

    /// `{protocol}://{host}/`, when git sent both.
    pub fn target_uri(&self) -> Result<Option<Url>> {
        match (&self.protocol, &self.host) {
            (Some(protocol), Some(host)) => {
                let raw = format!("{}://{}/", protocol, host);
                let url = Url::parse(&raw).with_context(|| format!("invalid target {}", raw))?;
                Ok(Some(url))
            }
            _ => Ok(None),
        }
    }

    /// Apply `credential.*` settings that match the target.
    ///
    /// Boolean options keep their current value when the setting is not a
    /// recognizable boolean.
    pub fn load_configuration(&mut self, config: &Configuration, target: Option<&Url>) {
        let entry = |key: &str| config.try_get_entry(CONFIG_PREFIX, target, key);

        if let Some(entry) = entry("authority") {
            tracing::debug!("   authority = {}", entry.value);
            self.authority = AuthorityType::from_config_value(&entry.value);
        }
        if let Some(entry) = entry("interactive") {
            tracing::debug!("   interactive = {}", entry.value);
            self.interactivity = Interactivity::from_config_value(&entry.value);
        }
        if let Some(value) = entry("validate").and_then(|e| parse_bool(&e.value)) {
            self.validate_credentials = value;
        }
        if let Some(value) = entry("writelog").and_then(|e| parse_bool(&e.value)) {
            self.write_log = value;
        }
        if let Some(value) =
            entry(CAN_FALL_BACK_TO_INSECURE_STORE).and_then(|e| parse_bool(&e.value))
        {
            self.can_fall_back_to_insecure_store = value;
        }
    }

    pub fn set_credentials(&mut self, credentials: &Credential) {
        self.username = Some(credentials.username().to_string());
        self.password = Some(credentials.password().to_string());
    }

    /// The credentials git supplied, if both parts are present.
    pub fn credentials(&self) -> Option<Credential> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credential::new(username, password)),
            _ => None,
        }
    }
}

impl fmt::Display for OperationArguments {
    /// The response git reads back; `username` and `password` only when known.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protocol={}", self.protocol.as_deref().unwrap_or_default())?;
        writeln!(f, "host={}", self.host.as_deref().unwrap_or_default())?;
        writeln!(f, "path={}", self.path.as_deref().unwrap_or_default())?;
        if let Some(username) = &self.username {
            writeln!(f, "username={}", username)?;
        }
        if let Some(password) = &self.password {
            writeln!(f, "password={}", password)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OperationArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationArguments")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("authority", &self.authority)
            .field("interactivity", &self.interactivity)
            .field("validate_credentials", &self.validate_credentials)
            .finish()
    }
}
