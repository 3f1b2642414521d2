//! Device code flow against the Azure v1 endpoints.
//!
//! # Flow Overview
//!
//! 1. Request a device code and user code from `{authority}/oauth2/devicecode`
//! 2. Hand the user code and verification URL to the caller for display
//! 3. The user signs in on another device
//! 4. Poll the token endpoint until the user finishes or the code expires

use oauth2::ClientId;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;

use super::{create_device_token_request_body, error_from_response, AuthorityError};
use crate::token::TokenPair;

const DEFAULT_EXPIRES_IN: u64 = 600;
const DEFAULT_INTERVAL: u64 = 5;
const SLOW_DOWN_INCREMENT: u64 = 5;

/// Invoked once with the device code response so the user can be told what to do.
pub type DeviceCodeCallback = dyn Fn(&DeviceAuthorization) + Send + Sync;

/// Device authorization response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// The device verification code (keep this secret).
    pub device_code: String,

    /// The code the user enters at the verification URL.
    pub user_code: String,

    /// Where the user should go to authorize.
    pub verification_url: String,

    /// Seconds until the device code expires.
    pub expires_in: u64,

    /// Minimum seconds between polling requests.
    pub interval: u64,

    /// Human readable instructions from the authority.
    pub message: Option<String>,
}

impl DeviceAuthorization {
    /// Parse a device code response.
    ///
    /// The v1 endpoint reports `expires_in` and `interval` as strings, so both
    /// string and number forms are accepted.
    pub fn from_json(body: &str) -> Result<Self, AuthorityError> {
        let json: serde_json::Value =
            serde_json::from_str(body).map_err(|e| AuthorityError::Parse {
                message: format!("invalid device code response: {}", e),
            })?;

        let required = |name: &str| {
            json[name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| AuthorityError::Parse {
                    message: format!("device code response is missing {}", name),
                })
        };

        let verification_url = match json["verification_url"].as_str() {
            Some(url) => url.to_string(),
            None => required("verification_uri")?,
        };

        Ok(Self {
            device_code: required("device_code")?,
            user_code: required("user_code")?,
            verification_url,
            expires_in: seconds(&json["expires_in"]).unwrap_or(DEFAULT_EXPIRES_IN),
            interval: seconds(&json["interval"]).unwrap_or(DEFAULT_INTERVAL),
            message: json["message"].as_str().map(str::to_string),
        })
    }

    /// The text shown to the user.
    pub fn instructions(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_url, self.user_code
            ),
        }
    }
}

fn seconds(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Poll `token_url` until the user completes the device authorization.
///
/// `authorization_pending` keeps polling, `slow_down` lengthens the interval,
/// and every other error ends the flow.
pub(crate) async fn poll_for_token(
    http: &reqwest::Client,
    token_url: &Url,
    client_id: &ClientId,
    device: &DeviceAuthorization,
) -> Result<TokenPair, AuthorityError> {
    let timeout = Duration::from_secs(device.expires_in);
    let start_time = Instant::now();
    let mut interval = device.interval;
    let body = create_device_token_request_body(client_id, &device.device_code);

    loop {
        if start_time.elapsed() > timeout {
            return Err(AuthorityError::Authorization {
                code: "expired_token".to_string(),
                description: "device code expired".to_string(),
            });
        }

        sleep(Duration::from_secs(interval)).await;

        let response = http
            .post(token_url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body.clone())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(TokenPair::from_json(&text)?);
        }

        match error_from_response(status.as_u16(), token_url, &text) {
            AuthorityError::Authorization { code, .. } if code == "authorization_pending" => {
                tracing::debug!("authorization pending, continuing to poll");
            }
            AuthorityError::Authorization { code, .. } if code == "slow_down" => {
                tracing::warn!("polling too fast, slowing down");
                interval += SLOW_DOWN_INCREMENT;
            }
            err => return Err(err),
        }
    }
}
