use url::Url;
use uuid::Uuid;

use super::{user_agent_header, AuthorityError, REQUEST_TIMEOUT};

/// Hosts that are probed for their backing authority.
pub const VSO_HOST_SUFFIX: &str = "visualstudio.com";

const RESOURCE_TENANT_HEADER: &str = "X-VSS-ResourceTenant";

/// The authority a host turned out to be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedAuthority {
    MicrosoftAccount,
    AzureDirectory { tenant_id: Uuid },
}

/// Probe `target` for the authority behind it.
///
/// Returns `None` when the host is not an Azure DevOps host or the probe
/// could not be completed; the caller then falls back to basic credentials.
pub async fn detect_authority(target: &Url) -> Option<DetectedAuthority> {
    let client = match probe_client() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("cannot build authority probe client: {}", e);
            return None;
        }
    };
    detect_authority_with(&client, target, VSO_HOST_SUFFIX).await
}

fn probe_client() -> Result<reqwest::Client, AuthorityError> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(user_agent_header())
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// [`detect_authority`] with an explicit client and host suffix.
///
/// `client` should not follow redirects: the tenant header is only present on
/// the host's own response.
pub async fn detect_authority_with(
    client: &reqwest::Client,
    target: &Url,
    host_suffix: &str,
) -> Option<DetectedAuthority> {
    let host = target.host_str()?.to_ascii_lowercase();
    if !host.ends_with(&host_suffix.to_ascii_lowercase()) {
        tracing::debug!("{} is not probed for an authority", host);
        return None;
    }

    let probe = Url::parse(&format!("{}/", target.origin().ascii_serialization())).ok()?;
    let response = match client.head(probe).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("authority probe of {} failed: {}", host, e);
            return None;
        }
    };

    let tenant_id = response
        .headers()
        .get(RESOURCE_TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .unwrap_or_else(Uuid::nil);

    let detected = if tenant_id.is_nil() {
        DetectedAuthority::MicrosoftAccount
    } else {
        DetectedAuthority::AzureDirectory { tenant_id }
    };
    tracing::info!("detected {:?} for {}", detected, host);
    Some(detected)
}
