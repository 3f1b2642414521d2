//! Integration tests for the Azure authority client.
//!
//! These tests run the authority against a mock server and verify:
//! - Authorization code and refresh token exchanges
//! - The device code flow, including pending polls
//! - Personal access token generation and credential validation
//! - Authority detection from the resource tenant header

use async_trait::async_trait;
use gcm_core::authority::{
    detect_authority_with, AuthorityError, AuthorizationResponse, AzureAuthority,
    DetectedAuthority, DeviceAuthorization, UserAgent, VsoAuthority, VsoAzureAuthority,
    VsoTokenScope,
};
use gcm_core::{Credential, Token, TokenType};
use oauth2::{AuthorizationCode, ClientId, RedirectUrl, RefreshToken};
use std::sync::{Arc, Mutex};
use url::Url;
use uuid::Uuid;
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const RESOURCE: &str = "499b84ac-1321-427f-aa17-267ca6975798";

/// User agent that approves every request, echoing the state it was sent.
struct ApprovingUserAgent {
    tamper_state: bool,
}

#[async_trait]
impl UserAgent for ApprovingUserAgent {
    async fn request_authorization_code(
        &self,
        authorize_url: &Url,
        _redirect_uri: &RedirectUrl,
    ) -> Result<Option<AuthorizationResponse>, AuthorityError> {
        let state = authorize_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());
        Ok(Some(AuthorizationResponse {
            code: AuthorizationCode::new("auth-code".to_string()),
            state: if self.tamper_state {
                Some("forged".to_string())
            } else {
                state
            },
        }))
    }
}

fn client_id() -> ClientId {
    ClientId::new("872cd9fa-d31f-45e0-9eab-6e460a02d1f1".to_string())
}

fn redirect() -> RedirectUrl {
    RedirectUrl::new("urn:ietf:wg:oauth:2.0:oob".to_string()).unwrap()
}

fn target(server: &MockServer) -> Url {
    Url::parse(&format!("{}/DefaultCollection", server.uri())).unwrap()
}

fn azure(server: &MockServer, tamper_state: bool) -> AzureAuthority {
    AzureAuthority::with_client(
        Some(&format!("{}/common", server.uri())),
        Arc::new(ApprovingUserAgent { tamper_state }),
        reqwest::Client::new(),
    )
}

fn token_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "token_type": "Bearer",
        "expires_in": "3599",
        "access_token": "new-access",
        "refresh_token": "new-refresh",
    }))
}

#[tokio::test]
async fn test_authorization_code_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("return-client-request-id=true"))
        .respond_with(token_response())
        .expect(1)
        .mount(&server)
        .await;

    let pair = azure(&server, false)
        .acquire_token(&target(&server), &client_id(), RESOURCE, &redirect(), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(pair.access_token, Token::new("new-access", TokenType::Access));
    assert_eq!(pair.refresh_token, Token::new("new-refresh", TokenType::Refresh));
    assert_eq!(pair.parameters.get("expires_in").map(String::as_str), Some("3599"));
}

#[tokio::test]
async fn test_state_mismatch_yields_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .respond_with(token_response())
        .expect(0)
        .mount(&server)
        .await;

    let result = azure(&server, true)
        .acquire_token(&target(&server), &client_id(), RESOURCE, &redirect(), None)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_refresh_token_exchange_and_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token&refresh_token=good"))
        .respond_with(token_response())
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .and(body_string_contains("refresh_token=revoked"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "AADSTS70008: The refresh token has expired",
        })))
        .mount(&server)
        .await;

    let authority = azure(&server, false);
    let pair = authority
        .acquire_token_by_refresh_token(
            &target(&server),
            &client_id(),
            RESOURCE,
            &RefreshToken::new("good".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(pair.access_token.value(), "new-access");

    let err = authority
        .acquire_token_by_refresh_token(
            &target(&server),
            &client_id(),
            RESOURCE,
            &RefreshToken::new("revoked".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthorityError::Authorization { ref code, .. } if code == "invalid_grant"
    ));
}

#[tokio::test]
async fn test_device_flow_polls_until_authorized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/devicecode"))
        .and(body_string_contains("response_type=device_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user_code": "CODE-1234",
            "device_code": "device-secret",
            "verification_url": "https://microsoft.com/devicelogin",
            "expires_in": "60",
            "interval": "0",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .and(body_string_contains("grant_type=device_code&code=device-secret"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending",
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .and(body_string_contains("grant_type=device_code&code=device-secret"))
        .respond_with(token_response())
        .expect(1)
        .mount(&server)
        .await;

    let shown: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = shown.clone();
    let callback = move |device: &DeviceAuthorization| {
        seen.lock().unwrap().push(device.user_code.clone());
    };

    let pair = azure(&server, false)
        .acquire_token_with_device_flow(
            &target(&server),
            &client_id(),
            RESOURCE,
            &redirect(),
            &callback,
        )
        .await
        .unwrap();

    assert_eq!(pair.refresh_token.value(), "new-refresh");
    assert_eq!(*shown.lock().unwrap(), ["CODE-1234"]);
}

#[tokio::test]
async fn test_device_flow_denied() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/devicecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user_code": "U",
            "device_code": "D",
            "verification_url": "https://v",
            "expires_in": 60,
            "interval": 0,
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/common/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "access_denied",
        })))
        .mount(&server)
        .await;

    let err = azure(&server, false)
        .acquire_token_with_device_flow(
            &target(&server),
            &client_id(),
            RESOURCE,
            &redirect(),
            &|_: &DeviceAuthorization| {},
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthorityError::Authorization { ref code, .. } if code == "access_denied"
    ));
}

fn vso(server: &MockServer) -> VsoAzureAuthority {
    VsoAzureAuthority::with_client(
        Some(&format!("{}/common", server.uri())),
        Arc::new(ApprovingUserAgent {
            tamper_state: false,
        }),
        reqwest::Client::new(),
    )
    .with_token_service_url(&server.uri())
}

#[tokio::test]
async fn test_generate_personal_access_token() {
    let server = MockServer::start().await;
    let instance_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/_apis/connectiondata"))
        .and(header("authorization", "Bearer access-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "instanceId": instance_id.to_string(),
            "locationServiceData": {},
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/_apis/token/sessiontokens"))
        .and(query_param("api-version", "1.0"))
        .and(query_param("tokentype", "compact"))
        .and(header("authorization", "Bearer access-value"))
        .and(body_string_contains("\"scope\":\"vso.code_write vso.packaging\""))
        .and(body_string_contains(&instance_id.to_string()))
        .and(body_string_contains("Git: "))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "personal-access-token",
            "scope": "vso.code_write vso.packaging",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = vso(&server)
        .generate_personal_access_token(
            &target(&server),
            &Token::new("access-value", TokenType::Access),
            VsoTokenScope::CODE_WRITE | VsoTokenScope::PACKAGING_READ,
            true,
        )
        .await
        .unwrap();

    assert_eq!(token.token_type(), TokenType::Personal);
    assert_eq!(token.value(), "personal-access-token");
    assert_eq!(token.target_identity(), instance_id);
}

#[tokio::test]
async fn test_generate_personal_access_token_without_instance_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/connectiondata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let err = vso(&server)
        .generate_personal_access_token(
            &target(&server),
            &Token::new("access-value", TokenType::Access),
            VsoTokenScope::default(),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthorityError::Parse { .. }));
}

#[tokio::test]
async fn test_validate_credentials() {
    let server = MockServer::start().await;

    // "user:pass" in base64
    Mock::given(method("GET"))
        .and(path("/_apis/connectiondata"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/_apis/connectiondata"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let authority = vso(&server);
    assert!(authority
        .validate_credentials(&target(&server), &Credential::new("user", "pass"))
        .await
        .unwrap());
    assert!(!authority
        .validate_credentials(&target(&server), &Credential::new("user", "wrong"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_validate_credentials_transport_error() {
    let authority = VsoAzureAuthority::with_client(
        None,
        Arc::new(ApprovingUserAgent {
            tamper_state: false,
        }),
        reqwest::Client::new(),
    );
    let unreachable = Url::parse("http://127.0.0.1:9/").unwrap();
    assert!(matches!(
        authority
            .validate_credentials(&unreachable, &Credential::new("u", "p"))
            .await,
        Err(AuthorityError::Transport(_))
    ));
}

fn probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_detect_azure_directory() {
    let server = MockServer::start().await;
    let tenant = Uuid::new_v4();

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("X-VSS-ResourceTenant", tenant.to_string()),
        )
        .mount(&server)
        .await;

    let detected = detect_authority_with(&probe_client(), &target(&server), "127.0.0.1").await;
    assert_eq!(
        detected,
        Some(DetectedAuthority::AzureDirectory { tenant_id: tenant })
    );
}

#[tokio::test]
async fn test_detect_microsoft_account() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("X-VSS-ResourceTenant", Uuid::nil().to_string())
                .insert_header("Location", "/elsewhere"),
        )
        .mount(&server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/elsewhere"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-VSS-ResourceTenant", Uuid::new_v4().to_string()),
        )
        .expect(0)
        .mount(&server)
        .await;

    let detected = detect_authority_with(&probe_client(), &target(&server), "127.0.0.1").await;
    assert_eq!(detected, Some(DetectedAuthority::MicrosoftAccount));
}

#[tokio::test]
async fn test_detect_without_header_is_microsoft_account() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let detected = detect_authority_with(&probe_client(), &target(&server), "127.0.0.1").await;
    assert_eq!(detected, Some(DetectedAuthority::MicrosoftAccount));
}
