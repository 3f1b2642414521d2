//! Insecure XML file storage.
//!
//! Secrets are kept in memory and rewritten to the backing file after every
//! change. The document looks like:
//!
//! ```xml
//! <insecureStore>
//!   <Tokens>
//!     <entry>
//!       <key>ada:https://account.visualstudio.com</key>
//!       <value>
//!         <Type>Refresh</Type>
//!         <Value>...</Value>
//!         <targetIdentity>...</targetIdentity>
//!       </value>
//!     </entry>
//!   </Tokens>
//!   <Credentials>
//!     <entry>
//!       <key>git:https://account.visualstudio.com</key>
//!       <value>
//!         <Password>...</Password>
//!         <Username>...</Username>
//!       </value>
//!     </entry>
//!   </Credentials>
//! </insecureStore>
//! ```
//!
//! `targetIdentity` is only written when it is not nil.

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{SecureStore, StoreError};
use crate::model::Credential;
use crate::token::{Token, TokenType};

/// Appended to the backing file's name once its contents have been migrated.
pub const MIGRATION_SUFFIX: &str = ".migrated";

#[derive(Debug, Default, Clone, PartialEq)]
struct Contents {
    tokens: BTreeMap<String, Token>,
    credentials: BTreeMap<String, Credential>,
}

struct State {
    path: Option<PathBuf>,
    contents: Contents,
}

/// Plain-text XML secure store.
///
/// Only used when the OS keyring is unavailable and the user has opted in.
/// Without a backing file the store lives purely in memory.
pub struct FileStore {
    state: Mutex<State>,
}

impl FileStore {
    /// Open the store backed by `path`. The file does not need to exist yet.
    ///
    /// A file that cannot be parsed is logged and ignored; it will be
    /// overwritten by the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(xml) if !xml.trim().is_empty() => parse_document(&xml).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable insecure store {}: {}", path.display(), e);
                Contents::default()
            }),
            Ok(_) => Contents::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Contents::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: Mutex::new(State {
                path: Some(path),
                contents,
            }),
        })
    }

    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(State {
                path: None,
                contents: Contents::default(),
            }),
        }
    }

    /// The backing file, if the store still has one.
    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// Render the current contents as an XML document.
    pub fn to_xml(&self) -> Result<String, StoreError> {
        write_document(&self.state.lock().contents)
    }

    /// Copy every secret into `target`, then stop using the backing file.
    ///
    /// Every copied secret must read back unchanged from `target` before the
    /// file is renamed with [`MIGRATION_SUFFIX`]; otherwise the file stays in
    /// use and an error is returned.
    pub async fn migrate_and_disable(&self, target: &dyn SecureStore) -> Result<(), StoreError> {
        let contents = self.state.lock().contents.clone();

        for (target_name, token) in &contents.tokens {
            target.write_token(target_name, token).await?;
        }
        for (target_name, credentials) in &contents.credentials {
            target.write_credentials(target_name, credentials).await?;
        }

        for (target_name, token) in &contents.tokens {
            if target.read_token(target_name).await?.as_ref() != Some(token) {
                return Err(not_migrated(target_name));
            }
        }
        for (target_name, credentials) in &contents.credentials {
            if target.read_credentials(target_name).await?.as_ref() != Some(credentials) {
                return Err(not_migrated(target_name));
            }
        }

        let path = self.state.lock().path.take();
        if let Some(path) = path {
            if path.is_file() {
                let mut migrated = path.clone().into_os_string();
                migrated.push(MIGRATION_SUFFIX);
                fs::rename(&path, &migrated)?;
                tracing::info!(
                    "migrated {} secrets, insecure store moved to {}",
                    contents.tokens.len() + contents.credentials.len(),
                    Path::new(&migrated).display()
                );
            }
        }
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Contents)) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        apply(&mut state.contents);
        if let Some(path) = &state.path {
            save(path, &state.contents)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FileStore")
            .field("path", &state.path)
            .field("tokens", &state.contents.tokens.len())
            .field("credentials", &state.contents.credentials.len())
            .finish()
    }
}

#[async_trait]
impl SecureStore for FileStore {
    async fn read_credentials(&self, target_name: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.state.lock().contents.credentials.get(target_name).cloned())
    }

    async fn write_credentials(
        &self,
        target_name: &str,
        credentials: &Credential,
    ) -> Result<(), StoreError> {
        self.update(|contents| {
            contents
                .credentials
                .insert(target_name.to_string(), credentials.clone());
        })
    }

    async fn read_token(&self, target_name: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.state.lock().contents.tokens.get(target_name).cloned())
    }

    async fn write_token(&self, target_name: &str, token: &Token) -> Result<(), StoreError> {
        self.update(|contents| {
            contents.tokens.insert(target_name.to_string(), token.clone());
        })
    }

    async fn delete(&self, target_name: &str) -> Result<(), StoreError> {
        self.update(|contents| {
            if contents.tokens.remove(target_name).is_none() {
                contents.credentials.remove(target_name);
            }
        })
    }
}

fn not_migrated(target_name: &str) -> StoreError {
    StoreError::BackendError {
        message: format!(
            "{} did not read back from the secure store, keeping the insecure store",
            target_name
        ),
    }
}

fn save(path: &Path, contents: &Contents) -> Result<(), StoreError> {
    let xml = write_document(contents)?;
    fs::write(path, xml)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn xml_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Xml {
        message: e.to_string(),
    }
}

fn write_document(contents: &Contents) -> Result<String, StoreError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    start(&mut writer, "insecureStore")?;

    start(&mut writer, "Tokens")?;
    for (key, token) in &contents.tokens {
        start(&mut writer, "entry")?;
        leaf(&mut writer, "key", key)?;
        start(&mut writer, "value")?;
        leaf(&mut writer, "Type", token.token_type().name())?;
        leaf(&mut writer, "Value", token.value())?;
        if !token.target_identity().is_nil() {
            leaf(&mut writer, "targetIdentity", &token.target_identity().to_string())?;
        }
        end(&mut writer, "value")?;
        end(&mut writer, "entry")?;
    }
    end(&mut writer, "Tokens")?;

    start(&mut writer, "Credentials")?;
    for (key, credentials) in &contents.credentials {
        start(&mut writer, "entry")?;
        leaf(&mut writer, "key", key)?;
        start(&mut writer, "value")?;
        leaf(&mut writer, "Password", credentials.password())?;
        leaf(&mut writer, "Username", credentials.username())?;
        end(&mut writer, "value")?;
        end(&mut writer, "entry")?;
    }
    end(&mut writer, "Credentials")?;

    end(&mut writer, "insecureStore")?;

    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

fn start(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<(), StoreError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<(), StoreError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn leaf(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), StoreError> {
    start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    end(writer, name)
}

#[derive(Default)]
struct PendingEntry {
    key: Option<String>,
    token_type: Option<String>,
    token_value: Option<String>,
    target_identity: Option<String>,
    password: Option<String>,
    username: Option<String>,
}

fn parse_document(xml: &str) -> Result<Contents, StoreError> {
    let mut reader = Reader::from_str(xml);
    let mut contents = Contents::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut entry = PendingEntry::default();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "entry" {
                    entry = PendingEntry::default();
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(name);
                text.clear();
                close_element(&mut stack, &mut text, &mut entry, &mut contents)?;
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(_) => close_element(&mut stack, &mut text, &mut entry, &mut contents)?,
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document"));
    }
    Ok(contents)
}

fn close_element(
    stack: &mut Vec<String>,
    text: &mut String,
    entry: &mut PendingEntry,
    contents: &mut Contents,
) -> Result<(), StoreError> {
    let name = stack.pop().ok_or_else(|| xml_error("unbalanced end tag"))?;
    let value = std::mem::take(text);
    let section = stack.get(1).map(String::as_str);

    match name.as_str() {
        "key" => entry.key = Some(value),
        "Type" => entry.token_type = Some(value),
        "Value" => entry.token_value = Some(value),
        "targetIdentity" => entry.target_identity = Some(value),
        "Password" => entry.password = Some(value),
        "Username" => entry.username = Some(value),
        "entry" => {
            let pending = std::mem::take(entry);
            match section {
                Some("Tokens") => {
                    if let Some((key, token)) = token_from_entry(pending)? {
                        contents.tokens.insert(key, token);
                    }
                }
                Some("Credentials") => {
                    if let (Some(key), Some(password), Some(username)) =
                        (pending.key, pending.password, pending.username)
                    {
                        contents
                            .credentials
                            .insert(key, Credential::new(username, password));
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
    Ok(())
}

fn token_from_entry(pending: PendingEntry) -> Result<Option<(String, Token)>, StoreError> {
    let (Some(key), Some(type_name), Some(value)) =
        (pending.key, pending.token_type, pending.token_value)
    else {
        return Ok(None);
    };

    let token_type: TokenType = type_name.trim().parse().map_err(xml_error)?;
    let mut token = Token::new(value, token_type);
    if let Some(identity) = pending.target_identity {
        let identity = Uuid::parse_str(identity.trim()).map_err(xml_error)?;
        token = token.with_target_identity(identity);
    }
    Ok(Some((key, token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn identity() -> Uuid {
        Uuid::parse_str("0f8fad5b-d9cb-469f-a165-70867728950e").unwrap()
    }

    async fn populate(store: &FileStore) {
        store
            .write_token(
                "ada:https://one.visualstudio.com",
                &Token::new("refresh <&> value", TokenType::Refresh)
                    .with_target_identity(identity()),
            )
            .await
            .unwrap();
        store
            .write_token(
                "git:https://two.visualstudio.com",
                &Token::new("pat", TokenType::Personal),
            )
            .await
            .unwrap();
        store
            .write_credentials(
                "git:https://three.example.com",
                &Credential::new("alice", " spaced password "),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("insecureStore.xml");

        let store = FileStore::open(&path).unwrap();
        populate(&store).await;

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.state.lock().contents, store.state.lock().contents);

        let token = reopened
            .read_token("ada:https://one.visualstudio.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.value(), "refresh <&> value");
        assert_eq!(token.target_identity(), identity());

        let credentials = reopened
            .read_credentials("git:https://three.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credentials.password(), " spaced password ");
    }

    #[tokio::test]
    async fn test_target_identity_only_written_when_set() {
        let store = FileStore::in_memory();
        store
            .write_token("k", &Token::new("v", TokenType::Personal))
            .await
            .unwrap();
        let xml = store.to_xml().unwrap();
        assert!(!xml.contains("targetIdentity"));
        assert!(xml.contains("<Type>Personal</Type>"));

        store
            .write_token(
                "k",
                &Token::new("v", TokenType::Personal).with_target_identity(identity()),
            )
            .await
            .unwrap();
        assert!(store.to_xml().unwrap().contains("<targetIdentity>"));
    }

    #[test]
    fn test_parses_hand_written_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<insecureStore>
  <Tokens>
    <entry><key>ada:https://a.com</key><value><Type>Refresh</Type><Value>r</Value></value></entry>
  </Tokens>
  <Credentials>
    <entry><key>git:https://a.com</key><value><Password>p</Password><Username>u</Username></value></entry>
  </Credentials>
</insecureStore>"#;
        let contents = parse_document(xml).unwrap();
        assert_eq!(
            contents.tokens.get("ada:https://a.com"),
            Some(&Token::new("r", TokenType::Refresh))
        );
        assert_eq!(
            contents.credentials.get("git:https://a.com"),
            Some(&Credential::new("u", "p"))
        );
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("insecureStore.xml");
        fs::write(&path, "<insecureStore><Tokens><entry>").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.state.lock().contents.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_delete_prefers_tokens() {
        let store = FileStore::in_memory();
        store
            .write_token("same", &Token::new("t", TokenType::Personal))
            .await
            .unwrap();
        store
            .write_credentials("same", &Credential::new("u", "p"))
            .await
            .unwrap();

        store.delete("same").await.unwrap();
        assert!(store.read_token("same").await.unwrap().is_none());
        assert!(store.read_credentials("same").await.unwrap().is_some());

        store.delete("same").await.unwrap();
        assert!(store.read_credentials("same").await.unwrap().is_none());
        store.delete("same").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("insecureStore.xml");
        let store = FileStore::open(&path).unwrap();
        populate(&store).await;

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_migrate_and_disable_with_backing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("insecureStore.xml");
        let store = FileStore::open(&path).unwrap();
        populate(&store).await;

        let target = MemoryStore::new();
        store.migrate_and_disable(&target).await.unwrap();

        assert_eq!(target.len(), 3);
        assert_eq!(
            target
                .read_credentials("git:https://three.example.com")
                .await
                .unwrap(),
            Some(Credential::new("alice", " spaced password "))
        );
        assert!(!path.is_file());
        assert!(temp.path().join("insecureStore.xml.migrated").is_file());
        assert!(store.path().is_none());
    }

    /// Accepts every write and never returns anything.
    struct ForgetfulStore;

    #[async_trait]
    impl SecureStore for ForgetfulStore {
        async fn read_credentials(&self, _: &str) -> Result<Option<Credential>, StoreError> {
            Ok(None)
        }
        async fn write_credentials(&self, _: &str, _: &Credential) -> Result<(), StoreError> {
            Ok(())
        }
        async fn read_token(&self, _: &str) -> Result<Option<Token>, StoreError> {
            Ok(None)
        }
        async fn write_token(&self, _: &str, _: &Token) -> Result<(), StoreError> {
            Ok(())
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_migrate_keeps_file_when_target_loses_secrets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("insecureStore.xml");
        let store = FileStore::open(&path).unwrap();
        populate(&store).await;

        let result = store.migrate_and_disable(&ForgetfulStore).await;

        assert!(matches!(result, Err(StoreError::BackendError { .. })));
        assert!(path.is_file());
        assert!(!temp.path().join("insecureStore.xml.migrated").exists());
        assert_eq!(store.path(), Some(path.clone()));

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened
                .read_credentials("git:https://three.example.com")
                .await
                .unwrap(),
            Some(Credential::new("alice", " spaced password "))
        );
    }

    #[tokio::test]
    async fn test_migrate_and_disable_without_backing_file() {
        let store = FileStore::in_memory();
        populate(&store).await;

        let target = MemoryStore::new();
        store.migrate_and_disable(&target).await.unwrap();
        assert_eq!(target.len(), 3);
    }
}
