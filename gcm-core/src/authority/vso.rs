use async_trait::async_trait;
use oauth2::{ClientId, RedirectUrl, RefreshToken};
use serde_json::json;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::azure::AzureAuthority;
use super::device_flow::DeviceCodeCallback;
use super::{default_http_client, AuthorityError, UserAgent, VsoTokenScope};
use crate::model::Credential;
use crate::token::{Token, TokenPair, TokenType};

/// Service issuing personal access tokens.
pub const DEFAULT_TOKEN_SERVICE_URL: &str = "https://app.vssps.visualstudio.com";

const CONNECTION_DATA_PATH: &str = "/_apis/connectiondata";
const SESSION_TOKENS_PATH: &str = "/_apis/token/sessiontokens";

/// Operations the authentication cascade needs from an authority.
///
/// [`VsoAzureAuthority`] is the production implementation; tests substitute
/// their own.
#[async_trait]
pub trait VsoAuthority: Send + Sync {
    /// Interactive logon. `Ok(None)` when the user agent returned nothing usable.
    async fn acquire_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        query_parameters: Option<&str>,
    ) -> Result<Option<TokenPair>, AuthorityError>;

    async fn acquire_token_by_refresh_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        refresh_token: &RefreshToken,
    ) -> Result<TokenPair, AuthorityError>;

    async fn acquire_token_with_device_flow(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        callback: &DeviceCodeCallback,
    ) -> Result<TokenPair, AuthorityError>;

    /// Trade an access token for a personal access token bound to the target account.
    async fn generate_personal_access_token(
        &self,
        target: &Url,
        access_token: &Token,
        scope: VsoTokenScope,
        require_compact: bool,
    ) -> Result<Token, AuthorityError>;

    /// Whether the host accepts `credentials`.
    async fn validate_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<bool, AuthorityError>;
}

/// [`AzureAuthority`] plus the Azure DevOps token service.
#[derive(Clone, Debug)]
pub struct VsoAzureAuthority {
    azure: AzureAuthority,
    token_service_url: String,
}

impl VsoAzureAuthority {
    /// Create an authority; `None` selects the common endpoint.
    pub fn new(
        authority_host_url: Option<&str>,
        user_agent: Arc<dyn UserAgent>,
    ) -> Result<Self, AuthorityError> {
        Ok(Self::with_client(
            authority_host_url,
            user_agent,
            default_http_client()?,
        ))
    }

    pub fn with_client(
        authority_host_url: Option<&str>,
        user_agent: Arc<dyn UserAgent>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            azure: AzureAuthority::with_client(authority_host_url, user_agent, http),
            token_service_url: DEFAULT_TOKEN_SERVICE_URL.to_string(),
        }
    }

    /// Use a different personal access token service.
    pub fn with_token_service_url(mut self, token_service_url: &str) -> Self {
        self.token_service_url = token_service_url.trim_end_matches('/').to_string();
        self
    }

    pub fn authority_host_url(&self) -> &str {
        self.azure.authority_host_url()
    }

    fn connection_data_url(target: &Url) -> Result<Url, AuthorityError> {
        let origin = target.origin().ascii_serialization();
        Url::parse(&format!("{}{}", origin, CONNECTION_DATA_PATH)).map_err(|e| {
            AuthorityError::Parse {
                message: format!("invalid connection data url for {}: {}", target, e),
            }
        })
    }

    fn session_tokens_url(&self, require_compact: bool) -> Result<Url, AuthorityError> {
        let mut raw = format!("{}{}?api-version=1.0", self.token_service_url, SESSION_TOKENS_PATH);
        if require_compact {
            raw.push_str("&tokentype=compact");
        }
        Url::parse(&raw).map_err(|e| AuthorityError::Parse {
            message: format!("invalid token service url {}: {}", raw, e),
        })
    }

    /// The account's instance id, used as the token's target identity.
    async fn query_instance_id(
        &self,
        target: &Url,
        access_token: &Token,
    ) -> Result<Uuid, AuthorityError> {
        let url = Self::connection_data_url(target)?;
        let response = self
            .azure
            .http()
            .get(url.clone())
            .bearer_auth(access_token.value())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        json["instanceId"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| AuthorityError::Parse {
                message: "connection data has no instanceId".to_string(),
            })
    }
}

#[async_trait]
impl VsoAuthority for VsoAzureAuthority {
    async fn acquire_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        query_parameters: Option<&str>,
    ) -> Result<Option<TokenPair>, AuthorityError> {
        self.azure
            .acquire_token(target, client_id, resource, redirect_uri, query_parameters)
            .await
    }

    async fn acquire_token_by_refresh_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        refresh_token: &RefreshToken,
    ) -> Result<TokenPair, AuthorityError> {
        self.azure
            .acquire_token_by_refresh_token(target, client_id, resource, refresh_token)
            .await
    }

    async fn acquire_token_with_device_flow(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        callback: &DeviceCodeCallback,
    ) -> Result<TokenPair, AuthorityError> {
        self.azure
            .acquire_token_with_device_flow(target, client_id, resource, redirect_uri, callback)
            .await
    }

    async fn generate_personal_access_token(
        &self,
        target: &Url,
        access_token: &Token,
        scope: VsoTokenScope,
        require_compact: bool,
    ) -> Result<Token, AuthorityError> {
        let instance_id = self.query_instance_id(target, access_token).await?;

        let body = json!({
            "scope": scope.to_string(),
            "targetAccounts": [instance_id.to_string()],
            "displayName": format!("Git: {} on {}", target, machine_name()),
        });

        let url = self.session_tokens_url(require_compact)?;
        tracing::debug!("requesting personal access token for {}", target);
        let response = self
            .azure
            .http()
            .post(url.clone())
            .bearer_auth(access_token.value())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        let value = json["token"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AuthorityError::Parse {
                message: "session token response has no token".to_string(),
            })?;

        tracing::info!("personal access token acquired for {}", target);
        Ok(Token::new(value, TokenType::Personal).with_target_identity(instance_id))
    }

    async fn validate_credentials(
        &self,
        target: &Url,
        credentials: &Credential,
    ) -> Result<bool, AuthorityError> {
        let url = Self::connection_data_url(target)?;
        let response = self
            .azure
            .http()
            .get(url)
            .basic_auth(credentials.username(), Some(credentials.password()))
            .send()
            .await?;

        let valid = response.status() == reqwest::StatusCode::OK;
        tracing::debug!(
            "credential validation for {} returned {}",
            target,
            response.status()
        );
        Ok(valid)
    }
}

fn machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
