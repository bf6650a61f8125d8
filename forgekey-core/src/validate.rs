//! Credential validation against a host's API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::client::{api_base_url, apply_auth, Auth};
use crate::model::HostCredentials;

/// Error type for validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// The host could not be reached.
    #[error("network error validating credentials for {host}: {source}")]
    Network {
        host: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Confirms that credentials are currently accepted by a host.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Check `credentials` against `host`.
    ///
    /// `Ok(false)` means the host answered and rejected them.
    async fn validate(&self, host: &str, credentials: &HostCredentials) -> Result<bool, ValidateError>;
}

/// Validates by fetching the authenticated user from the host's API.
#[derive(Debug, Clone)]
pub struct WebValidator {
    http: Client,
    base_url: Option<String>,
}

impl WebValidator {
    /// Create a validator that derives the API root from the host.
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: None,
        }
    }

    /// Send every validation request to `base_url`, whatever the host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn user_endpoint(&self, host: &str) -> String {
        let base = self.base_url.clone().unwrap_or_else(|| api_base_url(host));
        format!("{}/user", base)
    }
}

impl Default for WebValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Credentials as presented during validation.
///
/// A username turns the token into a basic-auth password, matching how the
/// client will later authenticate.
fn presented_auth(credentials: &HostCredentials) -> Option<Auth> {
    let token = credentials.token.clone().filter(|t| !t.is_empty())?;
    Some(match &credentials.username {
        Some(username) if !username.is_empty() => Auth::Basic {
            username: username.clone(),
            password: token,
        },
        _ => Auth::Token(token),
    })
}

#[async_trait]
impl Validator for WebValidator {
    async fn validate(&self, host: &str, credentials: &HostCredentials) -> Result<bool, ValidateError> {
        let Some(auth) = presented_auth(credentials) else {
            debug!("no token to validate for {}", host);
            return Ok(false);
        };

        let url = self.user_endpoint(host);
        debug!("validating credentials for {} via {}", host, url);

        let request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "forgekey");

        let response = apply_auth(request, Some(&auth))
            .send()
            .await
            .map_err(|source| ValidateError::Network {
                host: host.to_string(),
                source,
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("credentials for {} rejected ({})", host, status);
                Ok(false)
            }
            _ => {
                debug!("unexpected status {} validating {}", status, host);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_user_endpoint() {
        let validator = WebValidator::new();
        assert_eq!(validator.user_endpoint("github.com"), "https://api.github.com/user");
        assert_eq!(
            validator.user_endpoint("ghe.example.com"),
            "https://ghe.example.com/api/v3/user"
        );

        let validator = WebValidator::new().with_base_url("http://localhost:9999/");
        assert_eq!(validator.user_endpoint("github.com"), "http://localhost:9999/user");
    }

    #[test]
    fn test_presented_auth() {
        let creds = HostCredentials::new("github.com");
        assert!(presented_auth(&creds).is_none());

        let creds = HostCredentials::new("github.com").with_token("t");
        assert_eq!(presented_auth(&creds), Some(Auth::Token("t".into())));

        let creds = HostCredentials::new("github.com").with_username("u").with_token("p");
        assert!(matches!(presented_auth(&creds), Some(Auth::Basic { .. })));
    }

    #[tokio::test]
    async fn test_validate_accepts_on_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("Authorization", "token good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "login": "octocat"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let validator = WebValidator::new().with_base_url(mock_server.uri());
        let creds = HostCredentials::new("github.com").with_token("good");

        assert!(validator.validate("github.com", &creds).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_rejects_on_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let validator = WebValidator::new().with_base_url(mock_server.uri());
        let creds = HostCredentials::new("github.com").with_token("bad");

        assert!(!validator.validate("github.com", &creds).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_without_token_skips_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let validator = WebValidator::new().with_base_url(mock_server.uri());
        let creds = HostCredentials::new("github.com").with_username("u");

        assert!(!validator.validate("github.com", &creds).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_unreachable_host_is_error() {
        // Port 1 on localhost refuses connections.
        let validator = WebValidator::new().with_base_url("http://127.0.0.1:1");
        let creds = HostCredentials::new("github.com").with_token("t");

        let result = validator.validate("github.com", &creds).await;
        assert!(matches!(result, Err(ValidateError::Network { .. })));
    }
}
