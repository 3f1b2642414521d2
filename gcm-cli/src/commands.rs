//! The `get`, `store` and `erase` operations.

use anyhow::{Context, Result};
use gcm_core::authority::DeviceAuthorization;
use gcm_core::{
    create_store, Authentication, AuthenticationError, AuthenticationFactory, AuthorityType,
    CacheRegistry, CredentialPolicy,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::logging::FATAL_TARGET;
use crate::protocol::OperationArguments;

/// Tells git to stop asking other helpers. Git expects no trailing newline.
pub const ABORT_AUTHENTICATION_RESPONSE: &str = "quit=true";

pub const AUTH_FAILURE_MESSAGE: &str = "Logon failed, aborting authentication process.";

const INSECURE_STORE_FILE: &str = "insecureStore.xml";

/// `<data-local>/git-credential-manager/insecureStore.xml`.
pub fn insecure_store_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().context("could not determine the home directory")?;
    Ok(dirs
        .data_local_dir()
        .join(env!("CARGO_BIN_NAME"))
        .join(INSECURE_STORE_FILE))
}

/// Record why the helper quit, then tell git to stop asking.
pub fn fatal(error: &anyhow::Error, stdout: &mut impl Write) -> std::io::Result<()> {
    tracing::error!(target: FATAL_TARGET, "{:#}", error);
    eprintln!("Fatal: {:#}", error);
    // no trailing newline; git reads the response verbatim
    write!(stdout, "{}", ABORT_AUTHENTICATION_RESPONSE)?;
    stdout.flush()
}

/// Open the secret store and wire up the factory the operations share.
pub async fn create_factory(args: &OperationArguments) -> Result<AuthenticationFactory> {
    let path = insecure_store_path()?;
    let store = create_store(&path, args.can_fall_back_to_insecure_store)
        .await
        .context("failed to open the secret store")?;

    Ok(AuthenticationFactory::new(store, CacheRegistry::new())
        .with_device_callback(Arc::new(print_device_code)))
}

/// Show the device flow instructions on stderr.
pub fn print_device_code(device: &DeviceAuthorization) {
    eprintln!("------------------------------------");
    eprintln!("OAuth 2.0 Device Flow authentication");
    eprintln!("------------------------------------");
    eprintln!(
        "To complete the authentication process, please open a web browser and visit the following URI:"
    );
    eprintln!("{}", device.verification_url);
    eprintln!("When prompted, enter the following code:");
    eprintln!("{}", device.user_code);
    eprintln!("Once authenticated and authorized, execution will continue.");
}

/// Resolve the authentication for the configured authority.
pub async fn authentication_for(
    args: &OperationArguments,
    target: &Url,
    factory: &AuthenticationFactory,
) -> Result<Authentication> {
    let authentication = Authentication::for_authority(args.authority, target, factory)
        .await
        .with_context(|| format!("no authentication for {} authority", args.authority))?;
    tracing::debug!("authority for {} is {}", target, authentication.kind());
    Ok(authentication)
}

/// Produce the response to `get`.
///
/// Azure authorities that find nothing abort the whole lookup; basic
/// authentication answers without credentials so git can prompt.
pub async fn get(
    mut args: OperationArguments,
    target: &Url,
    authentication: &Authentication,
) -> Result<String> {
    let policy = CredentialPolicy {
        interactivity: args.interactivity,
        validate: args.validate_credentials,
    };

    match authentication.get_credentials(target, policy).await? {
        Some(credentials) => {
            tracing::debug!("credentials found for {}", target);
            args.set_credentials(&credentials);
        }
        None => match authentication.kind() {
            AuthorityType::MicrosoftAccount | AuthorityType::AzureDirectory => {
                eprintln!("{}", AUTH_FAILURE_MESSAGE);
                tracing::info!("failed to retrieve credentials for {}", target);
                return Ok(ABORT_AUTHENTICATION_RESPONSE.to_string());
            }
            _ => tracing::debug!("no credentials stored for {}", target),
        },
    }

    Ok(args.to_string())
}

/// Save the credentials git approved.
pub async fn store(
    args: &OperationArguments,
    target: &Url,
    authentication: &Authentication,
) -> Result<()> {
    let credentials = args
        .credentials()
        .context("git did not supply a username and password to store")?;

    match authentication.store_credentials(target, &credentials).await {
        Ok(()) => Ok(()),
        Err(AuthenticationError::Unsupported { message }) => {
            tracing::debug!("not storing credentials for {}: {}", target, message);
            Ok(())
        }
        Err(e) => Err(e).context("failed to store credentials"),
    }
}

/// Forget the credentials git rejected.
pub async fn erase(target: &Url, authentication: &Authentication) -> Result<()> {
    authentication
        .erase_credentials(target)
        .await
        .context("failed to erase credentials")
}
