use oauth2::{ClientId, CsrfToken, RedirectUrl, RefreshToken};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::device_flow::{poll_for_token, DeviceAuthorization, DeviceCodeCallback};
use super::{
    create_authorization_endpoint_url, create_device_code_endpoint_url,
    create_device_code_request_body, create_refresh_token_request_body,
    create_token_endpoint_url, create_token_request_body, default_http_client,
    error_from_response, AuthorityError, AuthorizeRequest, PromptBehavior, UserAgent,
    DEFAULT_AUTHORITY_HOST,
};
use crate::token::TokenPair;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// OAuth2 client for an Azure authority host such as
/// `https://login.microsoftonline.com/common`.
#[derive(Clone)]
pub struct AzureAuthority {
    authority_host_url: String,
    user_agent: Arc<dyn UserAgent>,
    http: reqwest::Client,
}

impl AzureAuthority {
    /// Create an authority client; `None` selects the common endpoint.
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

    /// Create an authority client that sends requests through `http`.
    pub fn with_client(
        authority_host_url: Option<&str>,
        user_agent: Arc<dyn UserAgent>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            authority_host_url: authority_host_url
                .unwrap_or(DEFAULT_AUTHORITY_HOST)
                .trim_end_matches('/')
                .to_string(),
            user_agent,
            http,
        }
    }

    pub fn authority_host_url(&self) -> &str {
        &self.authority_host_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run the authorization code flow through the user agent.
    ///
    /// Returns `Ok(None)` when the user agent produced no code, or the state
    /// it returned does not match the one sent.
    pub async fn acquire_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        query_parameters: Option<&str>,
    ) -> Result<Option<TokenPair>, AuthorityError> {
        let state = CsrfToken::new_random();
        let correlation_id = Uuid::new_v4();
        let authorize_url = create_authorization_endpoint_url(&AuthorizeRequest {
            authority_host: &self.authority_host_url,
            resource,
            client_id,
            redirect_uri,
            user_identifier: None,
            state: Some(&state),
            prompt: PromptBehavior::Always,
            correlation_id: Some(correlation_id),
            query_parameters,
        })?;

        tracing::debug!("requesting authorization code for {}", target);
        let Some(response) = self
            .user_agent
            .request_authorization_code(&authorize_url, redirect_uri)
            .await?
        else {
            tracing::info!("no authorization code returned for {}", target);
            return Ok(None);
        };

        if response.state.as_deref() != Some(state.secret().as_str()) {
            tracing::warn!("authorization response state mismatch for {}", target);
            return Ok(None);
        }

        let body = create_token_request_body(
            resource,
            client_id,
            &response.code,
            redirect_uri,
            Some(correlation_id),
        );
        self.post_token_request(body).await.map(Some)
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn acquire_token_by_refresh_token(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        refresh_token: &RefreshToken,
    ) -> Result<TokenPair, AuthorityError> {
        tracing::debug!("refreshing access token for {}", target);
        let body =
            create_refresh_token_request_body(resource, client_id, refresh_token, Some(Uuid::new_v4()));
        self.post_token_request(body).await
    }

    /// Run the device code flow, reporting the user code through `callback`.
    pub async fn acquire_token_with_device_flow(
        &self,
        target: &Url,
        client_id: &ClientId,
        resource: &str,
        redirect_uri: &RedirectUrl,
        callback: &DeviceCodeCallback,
    ) -> Result<TokenPair, AuthorityError> {
        let device_url = create_device_code_endpoint_url(&self.authority_host_url)?;
        tracing::debug!("requesting device code for {}", target);

        let response = self
            .http
            .post(device_url.clone())
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(create_device_code_request_body(resource, client_id, redirect_uri))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &device_url, &text));
        }

        let device = DeviceAuthorization::from_json(&text)?;
        callback(&device);

        let token_url = create_token_endpoint_url(&self.authority_host_url)?;
        poll_for_token(&self.http, &token_url, client_id, &device).await
    }

    async fn post_token_request(&self, body: String) -> Result<TokenPair, AuthorityError> {
        let token_url = create_token_endpoint_url(&self.authority_host_url)?;

        let response = self
            .http
            .post(token_url.clone())
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status == reqwest::StatusCode::OK {
            let pair = TokenPair::from_json(&text)?;
            tracing::debug!("token endpoint returned a token pair");
            Ok(pair)
        } else {
            Err(error_from_response(status.as_u16(), &token_url, &text))
        }
    }
}

impl std::fmt::Debug for AzureAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureAuthority")
            .field("authority_host_url", &self.authority_host_url)
            .finish()
    }
}
