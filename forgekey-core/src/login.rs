//! Interactive login through the OAuth 2.0 Device Authorization Grant (RFC 8628).
//!
//! # Flow Overview
//!
//! 1. Request device and user codes from the host
//! 2. Show the user code and verification URL to the user
//! 3. User visits the URL in a browser and enters the code
//! 4. Poll the token endpoint until the user authorizes or denies
//! 5. Look up the username that goes with the new token
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), forgekey_core::login::LoginError> {
//! use forgekey_core::login::{DeviceCodeLogin, LoginFlow};
//!
//! let flow = DeviceCodeLogin::new("github.com", Some("Iv1.0123456789abcdef".to_string()))
//!     .with_prompt(|auth| {
//!         println!("Visit {} and enter code: {}", auth.verification_uri, auth.user_code);
//!     });
//!
//! let login = flow.login().await?;
//! println!("logged in as {:?}", login.username);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::{api_base_url, ApiClient, Auth};
use crate::model::{normalize_host, LoginData};
use crate::secret::Secret;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Error type for interactive login.
#[derive(Debug, Error)]
pub enum LoginError {
    /// No OAuth client ID is configured for the host.
    #[error("no OAuth client id configured for {host}")]
    NotConfigured { host: String },

    /// The user declined the authorization request.
    #[error("user denied authorization")]
    Denied,

    /// The device code expired before the user authorized it.
    #[error("device code expired")]
    Expired,

    /// Network error talking to the host.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The host answered with something unexpected.
    #[error("OAuth error: {message}")]
    OAuth { message: String },
}

/// Obtains fresh credentials by involving the user.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// Run the flow to completion.
    async fn login(&self) -> Result<LoginData, LoginError>;
}

/// Device authorization response.
///
/// Contains the codes and URIs needed for the user to authorize the device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    /// The device verification code (keep this secret).
    pub device_code: String,

    /// The user verification code to display to the user.
    pub user_code: String,

    /// The URI where the user should go to authorize.
    pub verification_uri: String,

    /// Minimum interval in seconds between polling requests.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Time in seconds until the device code expires.
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

/// Body of a token poll. The host reports pending states as `error`.
#[derive(Debug, Deserialize)]
struct TokenPollResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type PromptFn = Arc<dyn Fn(&DeviceAuthorization) + Send + Sync>;

/// Device code login for one host.
pub struct DeviceCodeLogin {
    host: String,
    client_id: Option<String>,
    scopes: Vec<String>,
    web_base: String,
    api_base: String,
    http: Client,
    prompt: PromptFn,
}

impl DeviceCodeLogin {
    /// Create a device login for `host` using the OAuth app `client_id`.
    pub fn new(host: impl Into<String>, client_id: Option<String>) -> Self {
        let host = normalize_host(&host.into());
        Self {
            web_base: format!("https://{}", host),
            api_base: api_base_url(&host),
            host,
            client_id,
            scopes: vec!["repo".to_string(), "read:user".to_string()],
            http: Client::new(),
            prompt: Arc::new(|auth: &DeviceAuthorization| {
                info!(
                    "Visit {} and enter code {}",
                    auth.verification_uri, auth.user_code
                );
            }),
        }
    }

    /// Override the web and API roots (enterprise proxies, tests).
    pub fn with_endpoints(mut self, web_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.web_base = web_base.into().trim_end_matches('/').to_string();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Scopes to request.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Called once with the codes the user has to enter.
    pub fn with_prompt(mut self, prompt: impl Fn(&DeviceAuthorization) + Send + Sync + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    fn client_id(&self) -> Result<&str, LoginError> {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LoginError::NotConfigured {
                host: self.host.clone(),
            })
    }

    /// Request device and user codes from the host.
    pub async fn request_device_code(&self) -> Result<DeviceAuthorization, LoginError> {
        let client_id = self.client_id()?;
        let scope = self.scopes.join(" ");

        let response = self
            .http
            .post(format!("{}/login/device/code", self.web_base))
            .header("Accept", "application/json")
            .form(&[("client_id", client_id), ("scope", scope.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoginError::OAuth {
                message: format!("device code request failed ({}): {}", status, body),
            });
        }

        response
            .json::<DeviceAuthorization>()
            .await
            .map_err(|e| LoginError::OAuth {
                message: format!("failed to parse device code response: {}", e),
            })
    }

    /// Poll the token endpoint until the user authorizes or the code expires.
    pub async fn poll_for_token(&self, device_auth: &DeviceAuthorization) -> Result<Secret, LoginError> {
        let client_id = self.client_id()?;
        let mut poll_interval = Duration::from_secs(device_auth.interval).min(MAX_POLL_INTERVAL);
        // No deadline when the expiry is too far out to represent.
        let deadline = Instant::now().checked_add(Duration::from_secs(device_auth.expires_in));

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(LoginError::Expired);
            }

            sleep(poll_interval).await;

            let response = self
                .http
                .post(format!("{}/login/oauth/access_token", self.web_base))
                .header("Accept", "application/json")
                .form(&[
                    ("client_id", client_id),
                    ("device_code", device_auth.device_code.as_str()),
                    ("grant_type", DEVICE_GRANT_TYPE),
                ])
                .send()
                .await?;

            let body = response.text().await?;
            let poll: TokenPollResponse = serde_json::from_str(&body).map_err(|_| LoginError::OAuth {
                message: format!("unexpected token response: {}", body),
            })?;

            if let Some(token) = poll.access_token {
                return Ok(Secret::new(token));
            }

            match poll.error.as_deref() {
                Some("authorization_pending") => {
                    debug!("authorization pending, continuing to poll");
                }
                Some("slow_down") => {
                    warn!("polling too fast, slowing down");
                    poll_interval = slowed_down(poll_interval);
                }
                Some("access_denied") => return Err(LoginError::Denied),
                Some("expired_token") => return Err(LoginError::Expired),
                Some(code) => {
                    return Err(LoginError::OAuth {
                        message: poll
                            .error_description
                            .map(|d| format!("{}: {}", code, d))
                            .unwrap_or_else(|| code.to_string()),
                    });
                }
                None => {
                    return Err(LoginError::OAuth {
                        message: "token response had neither token nor error".to_string(),
                    });
                }
            }
        }
    }

    /// Username for a freshly issued token, if the API will say.
    async fn lookup_username(&self, token: &Secret) -> Option<String> {
        let mut client = ApiClient::with_base_url(&self.api_base);
        client.authenticate(Auth::Token(token.clone()));

        match client.current_user().await {
            Ok(user) => Some(user.login),
            Err(e) => {
                warn!("logged in to {} but could not fetch user: {}", self.host, e);
                None
            }
        }
    }
}

fn slowed_down(interval: Duration) -> Duration {
    interval.saturating_add(SLOW_DOWN_STEP).min(MAX_POLL_INTERVAL)
}

impl std::fmt::Debug for DeviceCodeLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeLogin")
            .field("host", &self.host)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("web_base", &self.web_base)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[async_trait]
impl LoginFlow for DeviceCodeLogin {
    async fn login(&self) -> Result<LoginData, LoginError> {
        let device_auth = self.request_device_code().await?;
        (self.prompt)(&device_auth);

        let token = self.poll_for_token(&device_auth).await?;
        let username = self.lookup_username(&token).await;

        info!("device login to {} complete", self.host);

        Ok(LoginData {
            host: self.host.clone(),
            username,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_device_code(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login/device/code"))
            .and(body_string_contains("client_id=test-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-123",
                "user_code": "ABCD-1234",
                "verification_uri": "https://github.com/login/device",
                "expires_in": 900,
                "interval": 0
            })))
            .mount(server)
            .await;
    }

    fn flow(server: &MockServer) -> DeviceCodeLogin {
        DeviceCodeLogin::new("github.com", Some("test-client".to_string()))
            .with_endpoints(server.uri(), server.uri())
    }

    #[tokio::test]
    async fn test_login_polls_until_authorized() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;

        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "authorization_pending"
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_new",
                "token_type": "bearer",
                "scope": "repo"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "login": "octocat"
            })))
            .mount(&server)
            .await;

        let prompted = Arc::new(AtomicUsize::new(0));
        let seen = prompted.clone();
        let flow = flow(&server).with_prompt(move |auth| {
            assert_eq!(auth.user_code, "ABCD-1234");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let login = flow.login().await.unwrap();

        assert_eq!(prompted.load(Ordering::SeqCst), 1);
        assert_eq!(login.host, "github.com");
        assert_eq!(login.username.as_deref(), Some("octocat"));
        assert_eq!(login.token.expose(), "gho_new");
    }

    #[tokio::test]
    async fn test_login_denied() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;

        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "access_denied"
            })))
            .mount(&server)
            .await;

        let result = flow(&server).login().await;
        assert!(matches!(result, Err(LoginError::Denied)));
    }

    #[tokio::test]
    async fn test_login_without_user_lookup() {
        let server = MockServer::start().await;
        mount_device_code(&server).await;

        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_new"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let login = flow(&server).login().await.unwrap();
        assert!(login.username.is_none());
        assert_eq!(login.token.expose(), "gho_new");
    }

    #[tokio::test]
    async fn test_login_requires_client_id() {
        let flow = DeviceCodeLogin::new("github.com", None);
        let result = flow.login().await;
        assert!(matches!(result, Err(LoginError::NotConfigured { .. })));
    }

    #[tokio::test]
    async fn test_expired_device_code() {
        let server = MockServer::start().await;

        let device_auth = DeviceAuthorization {
            device_code: "dev-123".to_string(),
            user_code: "ABCD-1234".to_string(),
            verification_uri: "https://github.com/login/device".to_string(),
            interval: 0,
            expires_in: 0,
        };

        let result = flow(&server).poll_for_token(&device_auth).await;
        assert!(matches!(result, Err(LoginError::Expired)));
    }

    #[tokio::test]
    async fn test_huge_expiry_does_not_overflow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_new"
            })))
            .mount(&server)
            .await;

        let device_auth = DeviceAuthorization {
            device_code: "dev-123".to_string(),
            user_code: "ABCD-1234".to_string(),
            verification_uri: "https://github.com/login/device".to_string(),
            interval: 0,
            expires_in: u64::MAX,
        };

        let token = flow(&server).poll_for_token(&device_auth).await.unwrap();
        assert_eq!(token.expose(), "gho_new");
    }

    #[test]
    fn test_poll_interval_is_bounded() {
        assert_eq!(slowed_down(Duration::from_secs(5)), Duration::from_secs(10));
        assert_eq!(slowed_down(Duration::from_secs(58)), MAX_POLL_INTERVAL);
        assert_eq!(slowed_down(Duration::MAX), MAX_POLL_INTERVAL);
    }

    #[test]
    fn test_new_normalizes_host() {
        let flow = DeviceCodeLogin::new("GitHub.com", None);
        assert_eq!(flow.host, "github.com");
        assert_eq!(flow.api_base, "https://api.github.com");
    }
}
