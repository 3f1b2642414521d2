//! Git configuration resolution.
//!
//! Merges the system, global and local git configuration files into one
//! case-insensitive map and answers host-aware lookups the same way git
//! matches `credential.<url>.*` settings: the most specific match wins.
//!
//! The parser is best-effort. Lines it does not understand are skipped,
//! values never span lines, and includes are not followed.

use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::locate;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The directory to resolve the local configuration from does not exist.
    #[error("directory does not exist: {path}")]
    InvalidDirectory { path: PathBuf },

    /// A located configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A resolved configuration value and the key it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

/// Merged git configuration.
///
/// Keys are `section[.subsection].name` and compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    values: HashMap<String, String>,
}

impl Configuration {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load git's system, global and local configuration for `directory`.
    ///
    /// Files are applied lowest priority first so later files overwrite
    /// earlier keys. Missing files are skipped.
    pub fn load(directory: &Path) -> Result<Self, ConfigError> {
        if !directory.is_dir() {
            return Err(ConfigError::InvalidDirectory {
                path: directory.to_path_buf(),
            });
        }

        let files = [
            locate::git_system_config(),
            locate::git_global_config(),
            locate::git_local_config(directory),
        ];

        Self::load_files(files.into_iter().flatten())
    }

    /// Load the given files in order, later files taking precedence.
    pub fn load_files(files: impl IntoIterator<Item = PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        for path in files {
            if !path.is_file() {
                continue;
            }
            tracing::debug!("reading git configuration from {}", path.display());
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            config.merge_str(&content);
        }

        for (key, value) in &config.values {
            tracing::trace!("   {} = {}", key, value);
        }

        Ok(config)
    }

    /// Parse configuration text into a new configuration.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::new();
        config.merge_str(content);
        config
    }

    /// Parse configuration from a reader.
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let mut config = Self::new();
        let mut section: Option<String> = None;
        for line in reader.lines() {
            config.merge_line(&line?, &mut section);
        }
        Ok(config)
    }

    fn merge_str(&mut self, content: &str) {
        let mut section: Option<String> = None;
        for line in content.lines() {
            self.merge_line(line, &mut section);
        }
    }

    fn merge_line(&mut self, line: &str, section: &mut Option<String>) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            return;
        }

        if trimmed.starts_with('[') {
            if let Some(name) = parse_section(trimmed) {
                *section = Some(name);
            }
            return;
        }

        if let Some((name, value)) = parse_name_value(trimmed) {
            // pairs outside any section have no key to live under
            if let Some(section) = section.as_deref() {
                self.insert(&format!("{}.{}", section, name), value);
            }
        }
    }

    /// Insert or overwrite a value.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up `prefix.qualifier.key`, or `prefix.key` when the qualifier is empty.
    pub fn try_get_entry_for(&self, prefix: &str, qualifier: &str, key: &str) -> Option<Entry> {
        let candidate = if qualifier.is_empty() {
            format!("{}.{}", prefix, key)
        } else {
            format!("{}.{}.{}", prefix, qualifier, key)
        };

        self.get(&candidate).map(|value| Entry {
            value: value.to_string(),
            key: candidate,
        })
    }

    /// Resolve `key` for a target, most specific match first.
    ///
    /// For `https://dev.example.visualstudio.com` and prefix `credential` the
    /// candidates are, in order:
    ///
    /// ```text
    /// credential.https://dev.example.visualstudio.com.key
    /// credential.dev.example.visualstudio.com.key
    /// credential.example.visualstudio.com.key
    /// credential.visualstudio.com.key
    /// credential.key
    /// ```
    ///
    /// The top-level domain on its own is never tried.
    pub fn try_get_entry(&self, prefix: &str, target: Option<&Url>, key: &str) -> Option<Entry> {
        if let Some((scheme, host)) = target.and_then(|t| t.host_str().map(|h| (t.scheme(), h))) {
            let qualified = format!("{}://{}", scheme, host);
            if let Some(entry) = self
                .try_get_entry_for(prefix, &qualified, key)
                .or_else(|| self.try_get_entry_for(prefix, host, key))
            {
                return Some(entry);
            }

            let fragments: Vec<&str> = host.split('.').collect();
            for i in 1..fragments.len().saturating_sub(1) {
                let shortened = fragments[i..].join(".");
                if let Some(entry) = self.try_get_entry_for(prefix, &shortened, key) {
                    return Some(entry);
                }
            }
        }

        self.try_get_entry_for(prefix, "", key)
    }
}

/// `[name]` or `[name "subname"]`, yielding `name` or `name.subname`.
fn parse_section(line: &str) -> Option<String> {
    let inner = line.strip_prefix('[')?;
    let close = inner.find(']')?;
    if !inner[close + 1..].trim().is_empty() {
        return None;
    }
    let inner = inner[..close].trim_start();

    let name_len = word_len(inner);
    if name_len == 0 {
        return None;
    }
    let (name, rest) = inner.split_at(name_len);
    let rest = rest.trim();

    if rest.is_empty() {
        return Some(name.to_string());
    }
    if rest.starts_with('"') && rest.len() > 1 {
        return Some(format!("{}.{}", name, strip_quotes(rest)));
    }
    None
}

/// `name = value`, with the value trimmed and its quotes stripped.
fn parse_name_value(line: &str) -> Option<(&str, &str)> {
    let name_len = word_len(line);
    if name_len == 0 {
        return None;
    }
    let (name, rest) = line.split_at(name_len);
    let rest = rest.trim_start().strip_prefix('=')?;
    let value = rest.trim();
    if value.is_empty() {
        return None;
    }
    Some((name, strip_quotes(value)))
}

/// Length of the leading run of word characters (`[A-Za-z0-9_]`).
fn word_len(s: &str) -> usize {
    s.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count()
}

/// Drop an opening quote, and the closing quote when there is one.
fn strip_quotes(value: &str) -> &str {
    match value.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').unwrap_or(rest),
        None => value,
    }
}
