//! Authenticated API client for a repository host.

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::secret::Secret;

const USER_AGENT: &str = "forgekey";
const ACCEPT: &str = "application/vnd.github+json";

/// Error type for API client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the body could not be read.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The host answered with a non-success status.
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: StatusCode },
}

/// Credentials an [`ApiClient`] presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// A single token sent as `Authorization: token ...`.
    Token(Secret),

    /// HTTP basic authentication, with the token as the password.
    Basic { username: String, password: Secret },
}

/// The authenticated user as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    pub login: String,

    /// Numeric account ID.
    #[serde(default)]
    pub id: u64,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Builds an unauthenticated client for a host.
pub type ApiClientFactory = Arc<dyn Fn(&str) -> ApiClient + Send + Sync>;

/// The default factory: [`ApiClient::for_host`].
pub fn default_client_factory() -> ApiClientFactory {
    Arc::new(ApiClient::for_host)
}

/// API root for a host.
///
/// `github.com` uses the public API domain; any other host is treated as an
/// enterprise installation serving the API under `/api/v3`.
pub fn api_base_url(host: &str) -> String {
    if host.eq_ignore_ascii_case("github.com") {
        "https://api.github.com".to_string()
    } else {
        format!("https://{}/api/v3", host)
    }
}

/// Represents an API client for one host.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: Option<Auth>,
}

impl ApiClient {
    /// Create an unauthenticated client for `host`.
    pub fn for_host(host: &str) -> Self {
        Self::with_base_url(api_base_url(host))
    }

    /// Create an unauthenticated client against an explicit API root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
        }
    }

    /// Set the credentials used for every subsequent request.
    pub fn authenticate(&mut self, auth: Auth) {
        self.auth = Some(auth);
    }

    /// Credentials currently configured, if any.
    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// API root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request to `path` (relative to the API root) with auth and
    /// the standard headers applied.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self
            .http
            .request(method, url)
            .header("Accept", ACCEPT)
            .header("User-Agent", USER_AGENT);

        apply_auth(builder, self.auth.as_ref())
    }

    /// Fetch the authenticated user.
    pub async fn current_user(&self) -> Result<User, ClientError> {
        let response = self.request(Method::GET, "/user").send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: response.url().to_string(),
                status,
            });
        }

        Ok(response.json::<User>().await?)
    }
}

/// Attach `auth` to a request.
pub(crate) fn apply_auth(builder: RequestBuilder, auth: Option<&Auth>) -> RequestBuilder {
    match auth {
        Some(Auth::Token(token)) => {
            builder.header("Authorization", format!("token {}", token.expose()))
        }
        Some(Auth::Basic { username, password }) => {
            builder.basic_auth(username, Some(password.expose()))
        }
        None => builder,
    }
}
