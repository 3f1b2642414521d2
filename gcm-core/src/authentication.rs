//! Credential resolution per authority.
//!
//! [`Authentication`] is chosen from the configured (or detected)
//! [`AuthorityType`] and answers git's `get`, `store` and `erase` requests.
//!
//! # Azure Cascade
//!
//! For Microsoft Account and Azure Directory hosts, `get` runs the stages
//! below in order until one yields a personal access token that passes
//! validation:
//!
//! | Stage | Runs unless | Attempt |
//! |-------|-------------|---------|
//! | cached | interactivity is `Always` | none, the stored token is checked as is |
//! | refresh | interactivity is `Always` | refresh token, then federated token, exchanged for a new PAT |
//! | interactive | interactivity is `Never` | user agent logon |
//! | device flow | interactivity is `Never` | device code logon |
//!
//! A failing stage is logged and the next stage runs.

use oauth2::{ClientId, RedirectUrl, RefreshToken};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::authority::{
    authority_host_for_tenant, detect_authority, AuthorityError, DetectedAuthority,
    DeviceCodeCallback, NoUserAgent, UserAgent, VsoAuthority, VsoAzureAuthority, VsoTokenScope,
    MSA_AUTHORITY_HOST, MSA_QUERY_PARAMETERS,
};
use crate::cache::CacheRegistry;
use crate::model::{validate_target_uri, AuthorityType, Credential, Interactivity, ModelError};
use crate::secret_store::SecretStore;
use crate::store::{SecureStore, StoreError};
use crate::token::{Token, TokenError};

/// Application the authority issues tokens to.
pub const CLIENT_ID: &str = "872cd9fa-d31f-45e0-9eab-6e460a02d1f1";

/// Azure DevOps resource tokens are requested for.
pub const RESOURCE: &str = "499b84ac-1321-427f-aa17-267ca6975798";

/// Out-of-band redirect for native clients.
pub const REDIRECT_URL: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Namespace for personal access tokens and basic credentials.
pub const PERSONAL_ACCESS_TOKEN_NAMESPACE: &str = "git";

/// Namespace for Azure refresh tokens.
pub const REFRESH_TOKEN_NAMESPACE: &str = "ada";

/// Namespace for federated tokens captured by other tools.
pub const FEDERATED_TOKEN_NAMESPACE: &str = "registry";

/// Error type for authentication operations.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The operation is not available for this authority.
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Per-request policy for credential resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub interactivity: Interactivity,
    /// Check stored credentials against the host before returning them.
    pub validate: bool,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            interactivity: Interactivity::Auto,
            validate: true,
        }
    }
}

/// Builds authentications over a shared backing store and cache registry.
#[derive(Clone)]
pub struct AuthenticationFactory {
    backing: Arc<dyn SecureStore>,
    registry: CacheRegistry,
    user_agent: Arc<dyn UserAgent>,
    federated: Option<Arc<dyn SecureStore>>,
    device_callback: Option<Arc<DeviceCodeCallback>>,
    token_scope: VsoTokenScope,
}

impl AuthenticationFactory {
    pub fn new(backing: Arc<dyn SecureStore>, registry: CacheRegistry) -> Self {
        Self {
            backing,
            registry,
            user_agent: Arc::new(NoUserAgent),
            federated: None,
            device_callback: None,
            token_scope: VsoTokenScope::default(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: Arc<dyn UserAgent>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Source of federated tokens tried when no refresh token is stored.
    pub fn with_federated_store(mut self, federated: Arc<dyn SecureStore>) -> Self {
        self.federated = Some(federated);
        self
    }

    /// Enables the device flow stage; `callback` shows the user code.
    pub fn with_device_callback(mut self, callback: Arc<DeviceCodeCallback>) -> Self {
        self.device_callback = Some(callback);
        self
    }

    pub fn with_token_scope(mut self, token_scope: VsoTokenScope) -> Self {
        self.token_scope = token_scope;
        self
    }

    fn store(&self, namespace: &str) -> Result<SecretStore, StoreError> {
        SecretStore::new(self.backing.clone(), &self.registry, namespace)
    }

    pub fn basic(&self) -> Result<BasicAuthentication, AuthenticationError> {
        Ok(BasicAuthentication::new(
            self.store(PERSONAL_ACCESS_TOKEN_NAMESPACE)?,
        ))
    }

    pub fn microsoft_account(&self) -> Result<VsoAuthentication, AuthenticationError> {
        let authority = VsoAzureAuthority::new(Some(MSA_AUTHORITY_HOST), self.user_agent.clone())?;
        self.vso_with_authority(Arc::new(authority), Some(MSA_QUERY_PARAMETERS), Uuid::nil())
    }

    /// Azure Directory authentication; `None` uses the common tenant.
    pub fn azure_directory(
        &self,
        tenant_id: Option<Uuid>,
    ) -> Result<VsoAuthentication, AuthenticationError> {
        let host = authority_host_for_tenant(tenant_id);
        let authority = VsoAzureAuthority::new(Some(&host), self.user_agent.clone())?;
        self.vso_with_authority(Arc::new(authority), None, tenant_id.unwrap_or_default())
    }

    /// Azure authentication over an arbitrary authority.
    pub fn vso_with_authority(
        &self,
        authority: Arc<dyn VsoAuthority>,
        query_parameters: Option<&str>,
        tenant_id: Uuid,
    ) -> Result<VsoAuthentication, AuthenticationError> {
        let federated_token_store = match &self.federated {
            Some(federated) => Some(SecretStore::new(
                federated.clone(),
                &self.registry,
                FEDERATED_TOKEN_NAMESPACE,
            )?),
            None => None,
        };

        Ok(VsoAuthentication {
            authority,
            personal_access_token_store: self.store(PERSONAL_ACCESS_TOKEN_NAMESPACE)?,
            refresh_token_store: self.store(REFRESH_TOKEN_NAMESPACE)?,
            federated_token_store,
            token_scope: self.token_scope,
            query_parameters: query_parameters.map(str::to_string),
            device_callback: self.device_callback.clone(),
            tenant_id: RwLock::new(tenant_id),
            client_id: ClientId::new(CLIENT_ID.to_string()),
            redirect_uri: RedirectUrl::new(REDIRECT_URL.to_string()).map_err(|e| {
                AuthorityError::Parse {
                    message: format!("invalid redirect url: {}", e),
                }
            })?,
        })
    }
}

impl fmt::Debug for AuthenticationFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationFactory")
            .field("federated", &self.federated.is_some())
            .field("device_flow", &self.device_callback.is_some())
            .field("token_scope", &self.token_scope)
            .finish()
    }
}

/// How credentials for one host are obtained.
#[derive(Debug)]
pub enum Authentication {
    Basic(BasicAuthentication),
    MicrosoftAccount(VsoAuthentication),
    AzureDirectory(VsoAuthentication),
    /// NTLM/Kerberos; git negotiates with an empty credential.
    Integrated,
}

impl Authentication {
    /// Build the authentication for `kind`, probing the host when `kind` is `Auto`.
    pub async fn for_authority(
        kind: AuthorityType,
        target: &Url,
        factory: &AuthenticationFactory,
    ) -> Result<Self, AuthenticationError> {
        match kind {
            AuthorityType::Auto => {
                tracing::debug!("detecting authority for {}", target);
                Self::for_detected(detect_authority(target).await, factory)
            }
            AuthorityType::Basic => Ok(Self::Basic(factory.basic()?)),
            AuthorityType::MicrosoftAccount => {
                Ok(Self::MicrosoftAccount(factory.microsoft_account()?))
            }
            AuthorityType::AzureDirectory => {
                Ok(Self::AzureDirectory(factory.azure_directory(None)?))
            }
            AuthorityType::Integrated => Ok(Self::Integrated),
            AuthorityType::GitHub => Err(AuthenticationError::Unsupported {
                message: "the GitHub authority is not implemented".to_string(),
            }),
        }
    }

    /// Build the authentication for a detection result; undetermined means basic.
    pub fn for_detected(
        detected: Option<DetectedAuthority>,
        factory: &AuthenticationFactory,
    ) -> Result<Self, AuthenticationError> {
        match detected {
            Some(DetectedAuthority::MicrosoftAccount) => {
                Ok(Self::MicrosoftAccount(factory.microsoft_account()?))
            }
            Some(DetectedAuthority::AzureDirectory { tenant_id }) => Ok(Self::AzureDirectory(
                factory.azure_directory(Some(tenant_id))?,
            )),
            None => Ok(Self::Basic(factory.basic()?)),
        }
    }

    pub fn kind(&self) -> AuthorityType {
        match self {
            Self::Basic(_) => AuthorityType::Basic,
            Self::MicrosoftAccount(_) => AuthorityType::MicrosoftAccount,
            Self::AzureDirectory(_) => AuthorityType::AzureDirectory,
            Self::Integrated => AuthorityType::Integrated,
        }
    }

    /// Credentials for `target`, or `None` when every avenue failed.
    pub async fn get_credentials(
        &self,
        target: &Url,
        policy: CredentialPolicy,
    ) -> Result<Option<Credential>, AuthenticationError> {
        validate_target_uri(target)?;
        match self {
            Self::Basic(basic) => basic.get_credentials(target).await,
            Self::MicrosoftAccount(vso) | Self::AzureDirectory(vso) => {
                Ok(vso.acquire_credentials(target, policy).await)
            }
            Self::Integrated => Ok(Some(Credential::empty())),
        }
    }

    pub async fn store_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<(), AuthenticationError> {
        validate_target_uri(target)?;
        credentials.validate()?;
        match self {
            Self::Basic(basic) => basic.store_credentials(target, credentials).await,
            Self::MicrosoftAccount(_) | Self::AzureDirectory(_) => {
                Err(AuthenticationError::Unsupported {
                    message: format!("{} credentials are generated, not stored", self.kind()),
                })
            }
            Self::Integrated => Ok(()),
        }
    }

    pub async fn erase_credentials(&self, target: &Url) -> Result<(), AuthenticationError> {
        validate_target_uri(target)?;
        match self {
            Self::Basic(basic) => basic.erase_credentials(target).await,
            Self::MicrosoftAccount(vso) | Self::AzureDirectory(vso) => {
                vso.erase_credentials(target).await
            }
            Self::Integrated => Ok(()),
        }
    }
}

/// Username/password credentials kept exactly as git supplied them.
#[derive(Debug)]
pub struct BasicAuthentication {
    credential_store: SecretStore,
}

impl BasicAuthentication {
    pub fn new(credential_store: SecretStore) -> Self {
        Self { credential_store }
    }

    pub async fn get_credentials(
        &self,
        target: &Url,
    ) -> Result<Option<Credential>, AuthenticationError> {
        Ok(self.credential_store.read_credentials(target).await?)
    }

    pub async fn store_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<(), AuthenticationError> {
        Ok(self
            .credential_store
            .write_credentials(target, credentials)
            .await?)
    }

    pub async fn erase_credentials(&self, target: &Url) -> Result<(), AuthenticationError> {
        Ok(self.credential_store.delete_credentials(target).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Cached,
    Refresh,
    Interactive,
    DeviceFlow,
}

impl Stage {
    const ALL: [Stage; 4] = [
        Stage::Cached,
        Stage::Refresh,
        Stage::Interactive,
        Stage::DeviceFlow,
    ];

    fn allowed(self, interactivity: Interactivity) -> bool {
        match self {
            Stage::Cached | Stage::Refresh => interactivity != Interactivity::Always,
            Stage::Interactive | Stage::DeviceFlow => interactivity != Interactivity::Never,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Cached => "cached",
            Stage::Refresh => "refresh",
            Stage::Interactive => "interactive",
            Stage::DeviceFlow => "device flow",
        })
    }
}

/// Personal access tokens minted from Azure identities.
pub struct VsoAuthentication {
    authority: Arc<dyn VsoAuthority>,
    personal_access_token_store: SecretStore,
    refresh_token_store: SecretStore,
    federated_token_store: Option<SecretStore>,
    token_scope: VsoTokenScope,
    query_parameters: Option<String>,
    device_callback: Option<Arc<DeviceCodeCallback>>,
    tenant_id: RwLock<Uuid>,
    client_id: ClientId,
    redirect_uri: RedirectUrl,
}

impl VsoAuthentication {
    /// The tenant the last issued token belongs to; nil when unknown.
    pub fn tenant_id(&self) -> Uuid {
        *self.tenant_id.read()
    }

    pub fn token_scope(&self) -> VsoTokenScope {
        self.token_scope
    }

    /// The stored personal access token credential, if any.
    pub async fn get_credentials(
        &self,
        target: &Url,
    ) -> Result<Option<Credential>, AuthenticationError> {
        Ok(self
            .personal_access_token_store
            .read_credentials(target)
            .await?)
    }

    async fn acquire_credentials(
        &self,
        target: &Url,
        policy: CredentialPolicy,
    ) -> Option<Credential> {
        for stage in Stage::ALL {
            if !stage.allowed(policy.interactivity) {
                tracing::debug!("skipping {} stage for {}", stage, target);
                continue;
            }

            match self.run_stage(stage, target, policy).await {
                Ok(Some(credentials)) => {
                    tracing::info!("{} stage produced credentials for {}", stage, target);
                    return Some(credentials);
                }
                Ok(None) => tracing::debug!("{} stage produced nothing for {}", stage, target),
                Err(e) => tracing::warn!("{} stage failed for {}: {}", stage, target, e),
            }
        }
        None
    }

    async fn run_stage(
        &self,
        stage: Stage,
        target: &Url,
        policy: CredentialPolicy,
    ) -> Result<Option<Credential>, AuthenticationError> {
        let attempted = match stage {
            Stage::Cached => true,
            Stage::Refresh => self.refresh_credentials(target, true).await?,
            Stage::Interactive => self.interactive_logon(target, true).await?,
            Stage::DeviceFlow => match self.device_callback.clone() {
                Some(callback) => self.device_logon(target, true, callback.as_ref()).await?,
                None => false,
            },
        };
        if !attempted {
            return Ok(None);
        }

        let Some(credentials) = self.get_credentials(target).await? else {
            return Ok(None);
        };
        if policy.validate && !self.validate_credentials(target, &credentials).await? {
            tracing::info!("stored credentials for {} were rejected", target);
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    /// Mint a new personal access token from a stored refresh token, falling
    /// back to a federated token. Returns `false` when neither is stored.
    pub async fn refresh_credentials(
        &self,
        target: &Url,
        require_compact: bool,
    ) -> Result<bool, AuthenticationError> {
        if let Some(refresh_token) = self.refresh_token_store.read_token(target).await? {
            let refresh_token = RefreshToken::new(refresh_token.value().to_string());
            match self
                .authority
                .acquire_token_by_refresh_token(target, &self.client_id, RESOURCE, &refresh_token)
                .await
            {
                Ok(tokens) => {
                    tracing::debug!("refresh token exchanged for {}", target);
                    self.generate_personal_access_token(
                        target,
                        &tokens.access_token,
                        require_compact,
                    )
                    .await?;
                    return Ok(true);
                }
                Err(e) => tracing::warn!("refresh token rejected for {}: {}", target, e),
            }
        }

        if let Some(federated) = &self.federated_token_store {
            if let Some(token) = federated.read_token(target).await? {
                tracing::debug!("federated token found for {}", target);
                self.generate_personal_access_token(target, &token, require_compact)
                    .await?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Log on through the user agent. Returns `false` if the user agent gave up.
    pub async fn interactive_logon(
        &self,
        target: &Url,
        require_compact: bool,
    ) -> Result<bool, AuthenticationError> {
        let Some(tokens) = self
            .authority
            .acquire_token(
                target,
                &self.client_id,
                RESOURCE,
                &self.redirect_uri,
                self.query_parameters.as_deref(),
            )
            .await?
        else {
            return Ok(false);
        };

        self.refresh_token_store
            .write_token(target, &tokens.refresh_token)
            .await?;
        self.generate_personal_access_token(target, &tokens.access_token, require_compact)
            .await?;
        Ok(true)
    }

    /// Log on with the device code flow; `callback` shows the user code.
    pub async fn device_logon(
        &self,
        target: &Url,
        require_compact: bool,
        callback: &DeviceCodeCallback,
    ) -> Result<bool, AuthenticationError> {
        let tokens = self
            .authority
            .acquire_token_with_device_flow(
                target,
                &self.client_id,
                RESOURCE,
                &self.redirect_uri,
                callback,
            )
            .await?;

        self.refresh_token_store
            .write_token(target, &tokens.refresh_token)
            .await?;
        self.generate_personal_access_token(target, &tokens.access_token, require_compact)
            .await?;
        Ok(true)
    }

    /// Trade `access_token` for a personal access token and store it.
    pub async fn generate_personal_access_token(
        &self,
        target: &Url,
        access_token: &Token,
        require_compact: bool,
    ) -> Result<Credential, AuthenticationError> {
        let token = self
            .authority
            .generate_personal_access_token(target, access_token, self.token_scope, require_compact)
            .await?;
        let credentials = token.to_credential()?;

        self.personal_access_token_store
            .write_credentials(target, &credentials)
            .await?;

        let tenant_id = access_token.target_identity();
        if !tenant_id.is_nil() {
            *self.tenant_id.write() = tenant_id;
        }
        Ok(credentials)
    }

    pub async fn validate_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<bool, AuthenticationError> {
        Ok(self.authority.validate_credentials(target, credentials).await?)
    }

    /// Remove the personal access token, or the refresh token when no PAT is stored.
    pub async fn erase_credentials(&self, target: &Url) -> Result<(), AuthenticationError> {
        if self
            .personal_access_token_store
            .read_credentials(target)
            .await?
            .is_some()
        {
            self.personal_access_token_store
                .delete_credentials(target)
                .await?;
        } else if self.refresh_token_store.read_token(target).await?.is_some() {
            self.refresh_token_store.delete_token(target).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for VsoAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsoAuthentication")
            .field("tenant_id", &self.tenant_id())
            .field("token_scope", &self.token_scope)
            .field("query_parameters", &self.query_parameters)
            .finish()
    }
}
