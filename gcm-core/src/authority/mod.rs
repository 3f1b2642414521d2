//! Azure identity authority client.
//!
//! This module provides:
//! - [`AzureAuthority`] - OAuth2 authorization code, refresh and device code exchanges
//! - [`VsoAzureAuthority`] - adds personal access token generation and credential validation
//! - [`VsoAuthority`] - the trait the authentication cascade talks to
//! - [`UserAgent`] - the external collaborator that obtains authorization codes
//! - [`detect_authority`] - probing a host for its backing authority
//! - request builders for the authorize and token endpoints
//!
//! # Endpoints
//!
//! | Purpose | Endpoint |
//! |---------|----------|
//! | Authorize | `{authority}/oauth2/authorize` |
//! | Token | `{authority}/oauth2/token` |
//! | Device code | `{authority}/oauth2/devicecode` |

use async_trait::async_trait;
use oauth2::{AuthorizationCode, ClientId, CsrfToken, RedirectUrl, RefreshToken};
use std::time::Duration;
use thiserror::Error;
use url::form_urlencoded::Serializer;
use url::Url;
use uuid::Uuid;

use crate::token::TokenError;

mod azure;
mod detect;
mod device_flow;
mod scope;
mod vso;

pub use azure::AzureAuthority;
pub use detect::{detect_authority, detect_authority_with, DetectedAuthority, VSO_HOST_SUFFIX};
pub use device_flow::{DeviceAuthorization, DeviceCodeCallback};
pub use scope::VsoTokenScope;
pub use vso::{VsoAuthority, VsoAzureAuthority, DEFAULT_TOKEN_SERVICE_URL};

/// Base of every Azure authority host.
pub const AUTHORITY_HOST_BASE: &str = "https://login.microsoftonline.com";

/// Authority used when the tenant is unknown.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/common";

/// Authority for Microsoft Accounts.
pub const MSA_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/live.com";

/// Extra authorize parameters steering the login page to Microsoft Accounts.
pub const MSA_QUERY_PARAMETERS: &str = "domain_hint=live.com&display=popup&site_id=501454&nux=1";

/// Upper bound on every request made to an authority.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Error type for authority operations.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The request could not be sent or timed out.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The authority answered with an unexpected status.
    #[error("{url} returned status {status}")]
    Http { status: u16, url: String },

    /// The response body was not what the endpoint documents.
    #[error("failed to parse response: {message}")]
    Parse { message: String },

    /// The requested behaviour is not supported.
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Interactive authentication is not available in this process.
    #[error("interactive authentication unavailable: {message}")]
    Unavailable { message: String },

    /// The authority rejected the request with an OAuth error.
    #[error("authorization failed: {code}: {description}")]
    Authorization { code: String, description: String },

    /// A token could not be built from the response.
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Whether the authorize endpoint may show a login prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptBehavior {
    /// Let the authority decide.
    #[default]
    Auto,
    /// Force a login prompt.
    Always,
    /// Fail rather than prompt.
    Never,
    /// Not supported by the authorize endpoint.
    RefreshSession,
}

impl PromptBehavior {
    fn query_value(self) -> Result<Option<&'static str>, AuthorityError> {
        match self {
            Self::Auto => Ok(None),
            Self::Always => Ok(Some("login")),
            Self::Never => Ok(Some("attempt_none")),
            Self::RefreshSession => Err(AuthorityError::Unsupported {
                message: "prompt behavior RefreshSession".to_string(),
            }),
        }
    }
}

/// Everything needed to build an authorize URL.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest<'a> {
    pub authority_host: &'a str,
    pub resource: &'a str,
    pub client_id: &'a ClientId,
    pub redirect_uri: &'a RedirectUrl,
    /// Sent as `login_hint`.
    pub user_identifier: Option<&'a str>,
    pub state: Option<&'a CsrfToken>,
    pub prompt: PromptBehavior,
    pub correlation_id: Option<Uuid>,
    /// Appended verbatim after the standard parameters.
    pub query_parameters: Option<&'a str>,
}

/// The code and state a [`UserAgent`] brings back from the authorize endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    pub code: AuthorizationCode,
    pub state: Option<String>,
}

/// Obtains an authorization code from the user, typically through a browser.
#[async_trait]
pub trait UserAgent: Send + Sync {
    /// Show the authorize page and capture the redirect.
    ///
    /// `Ok(None)` means the user cancelled.
    async fn request_authorization_code(
        &self,
        authorize_url: &Url,
        redirect_uri: &RedirectUrl,
    ) -> Result<Option<AuthorizationResponse>, AuthorityError>;
}

/// User agent for processes that cannot show a login page.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserAgent;

#[async_trait]
impl UserAgent for NoUserAgent {
    async fn request_authorization_code(
        &self,
        _authorize_url: &Url,
        _redirect_uri: &RedirectUrl,
    ) -> Result<Option<AuthorizationResponse>, AuthorityError> {
        Err(AuthorityError::Unavailable {
            message: "no user agent is configured".to_string(),
        })
    }
}

/// `{host}/oauth2/authorize?...` with parameters in the order the authority logs them.
pub fn create_authorization_endpoint_url(
    request: &AuthorizeRequest<'_>,
) -> Result<Url, AuthorityError> {
    let mut query = Serializer::new(String::new());
    query
        .append_pair("resource", request.resource)
        .append_pair("client_id", request.client_id.as_str())
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", request.redirect_uri.as_str());

    if let Some(user) = request.user_identifier {
        query.append_pair("login_hint", user);
    }
    if let Some(correlation_id) = request.correlation_id {
        query.append_pair("client-request-id", &correlation_id.to_string());
    }
    if let Some(state) = request.state {
        query.append_pair("state", state.secret());
    }
    if let Some(prompt) = request.prompt.query_value()? {
        query.append_pair("prompt", prompt);
    }

    let mut query = query.finish();
    if let Some(extra) = request.query_parameters {
        let extra = extra.trim_start_matches('&');
        if !extra.is_empty() {
            query.push('&');
            query.push_str(extra);
        }
    }

    let raw = format!(
        "{}/oauth2/authorize?{}",
        request.authority_host.trim_end_matches('/'),
        query
    );
    Url::parse(&raw).map_err(|e| AuthorityError::Parse {
        message: format!("invalid authorize url {}: {}", raw, e),
    })
}

/// `{host}/oauth2/token`.
pub fn create_token_endpoint_url(authority_host: &str) -> Result<Url, AuthorityError> {
    endpoint(authority_host, "token")
}

/// `{host}/oauth2/devicecode`.
pub fn create_device_code_endpoint_url(authority_host: &str) -> Result<Url, AuthorityError> {
    endpoint(authority_host, "devicecode")
}

fn endpoint(authority_host: &str, name: &str) -> Result<Url, AuthorityError> {
    let raw = format!("{}/oauth2/{}", authority_host.trim_end_matches('/'), name);
    Url::parse(&raw).map_err(|e| AuthorityError::Parse {
        message: format!("invalid endpoint {}: {}", raw, e),
    })
}

/// Body exchanging an authorization code for tokens.
pub fn create_token_request_body(
    resource: &str,
    client_id: &ClientId,
    code: &AuthorizationCode,
    redirect_uri: &RedirectUrl,
    correlation_id: Option<Uuid>,
) -> String {
    let mut body = Serializer::new(String::new());
    body.append_pair("resource", resource)
        .append_pair("client_id", client_id.as_str())
        .append_pair("grant_type", "authorization_code")
        .append_pair("code", code.secret())
        .append_pair("redirect_uri", redirect_uri.as_str());
    append_correlation(&mut body, correlation_id);
    body.finish()
}

/// Body exchanging a refresh token for new tokens.
pub fn create_refresh_token_request_body(
    resource: &str,
    client_id: &ClientId,
    refresh_token: &RefreshToken,
    correlation_id: Option<Uuid>,
) -> String {
    let mut body = Serializer::new(String::new());
    body.append_pair("resource", resource)
        .append_pair("client_id", client_id.as_str())
        .append_pair("grant_type", "refresh_token")
        .append_pair("refresh_token", refresh_token.secret());
    append_correlation(&mut body, correlation_id);
    body.finish()
}

/// Body requesting a device code.
pub fn create_device_code_request_body(
    resource: &str,
    client_id: &ClientId,
    redirect_uri: &RedirectUrl,
) -> String {
    Serializer::new(String::new())
        .append_pair("response_type", "device_code")
        .append_pair("client_id", client_id.as_str())
        .append_pair("resource", resource)
        .append_pair("redirect_uri", redirect_uri.as_str())
        .finish()
}

/// Body polling the token endpoint with a device code.
pub fn create_device_token_request_body(client_id: &ClientId, device_code: &str) -> String {
    Serializer::new(String::new())
        .append_pair("grant_type", "device_code")
        .append_pair("code", device_code)
        .append_pair("client_id", client_id.as_str())
        .finish()
}

fn append_correlation(body: &mut Serializer<'_, String>, correlation_id: Option<Uuid>) {
    if let Some(correlation_id) = correlation_id {
        body.append_pair("client-request-id", &correlation_id.to_string())
            .append_pair("return-client-request-id", "true");
    }
}

/// The authority host for an Azure AD tenant, or the common endpoint.
pub fn authority_host_for_tenant(tenant_id: Option<Uuid>) -> String {
    match tenant_id {
        Some(tenant) if !tenant.is_nil() => format!("{}/{}", AUTHORITY_HOST_BASE, tenant),
        _ => DEFAULT_AUTHORITY_HOST.to_string(),
    }
}

/// `User-Agent` sent with every authority request.
pub fn user_agent_header() -> String {
    format!(
        "git-credential-manager ({}; {}) gcm-core/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    )
}

/// HTTP client with the authority timeout and user agent applied.
pub fn default_http_client() -> Result<reqwest::Client, AuthorityError> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(user_agent_header())
        .build()?)
}

/// Map a failed token endpoint response to an error.
///
/// OAuth error bodies become [`AuthorityError::Authorization`]; anything
/// else is reported by status.
pub(crate) fn error_from_response(status: u16, url: &Url, body: &str) -> AuthorityError {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) if json["error"].is_string() => AuthorityError::Authorization {
            code: json["error"].as_str().unwrap_or_default().to_string(),
            description: json["error_description"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        },
        _ => AuthorityError::Http {
            status,
            url: url.to_string(),
        },
    }
}
