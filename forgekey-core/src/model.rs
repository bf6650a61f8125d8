//! Domain model types for forgekey.
//!
//! This module defines the core types used throughout forgekey:
//! - [`Remote`] - A repository endpoint identified by host and URL
//! - [`HostCredentials`] - Username/token pair scoped to one host
//! - [`LoginData`] - What an interactive login hands back

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::secret::Secret;

/// Error type for model construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The remote could not be parsed or is missing a host.
    #[error("invalid remote '{url}': {reason}")]
    InvalidRemote { url: String, reason: String },
}

/// A repository endpoint.
///
/// The `host` selects credentials and the API endpoint; the `url` keys the
/// client cache and is what the OS credential helper is asked about.
///
/// # Examples
///
/// ```
/// use forgekey_core::Remote;
///
/// let remote = Remote::parse("git@github.com:octocat/hello-world.git").unwrap();
/// assert_eq!(remote.host(), "github.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RemoteFields")]
pub struct Remote {
    host: String,
    url: String,
}

#[derive(Deserialize)]
struct RemoteFields {
    host: String,
    url: String,
}

impl TryFrom<RemoteFields> for Remote {
    type Error = ModelError;

    fn try_from(fields: RemoteFields) -> Result<Self, Self::Error> {
        Self::new(fields.host, fields.url)
    }
}

impl Remote {
    /// Create a remote from an explicit host and URL.
    ///
    /// Both must be non-empty. The host is normalized to lowercase.
    pub fn new(host: impl Into<String>, url: impl Into<String>) -> Result<Self, ModelError> {
        let host = normalize_host(&host.into());
        let url = url.into().trim().to_string();

        if url.is_empty() {
            return Err(ModelError::InvalidRemote {
                url,
                reason: "url cannot be empty".to_string(),
            });
        }
        if host.is_empty() {
            return Err(ModelError::InvalidRemote {
                url,
                reason: "host cannot be empty".to_string(),
            });
        }

        Ok(Self { host, url })
    }

    /// Parse a git remote URL.
    ///
    /// Accepts `https://host/owner/repo`, `ssh://git@host/owner/repo` and the
    /// scp-like `git@host:owner/repo.git` form. Ports and userinfo are not
    /// part of the host.
    pub fn parse(url: &str) -> Result<Self, ModelError> {
        let trimmed = url.trim();

        let host = if trimmed.contains("://") {
            let parsed = Url::parse(trimmed).map_err(|e| ModelError::InvalidRemote {
                url: trimmed.to_string(),
                reason: e.to_string(),
            })?;
            parsed.host_str().map(str::to_string).unwrap_or_default()
        } else {
            scp_host(trimmed).ok_or_else(|| ModelError::InvalidRemote {
                url: trimmed.to_string(),
                reason: "expected a URL or user@host:path".to_string(),
            })?
        };

        Self::new(host, trimmed)
    }

    /// The remote's host (e.g. `github.com`).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote's URL as given.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl std::str::FromStr for Remote {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical form of a host name: trimmed and lowercased.
pub fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}

/// Whether two host names refer to the same host.
pub fn same_host(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Host of an scp-like `[user@]host:path` reference.
fn scp_host(s: &str) -> Option<String> {
    let (authority, path) = s.split_once(':')?;
    if path.is_empty() || path.starts_with("//") {
        return None;
    }
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some(host.to_string())
}

/// Credentials scoped to a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    /// Host these credentials apply to.
    pub host: String,

    /// Account name on the host, if known.
    #[serde(default)]
    pub username: Option<String>,

    /// Token or password.
    #[serde(default)]
    pub token: Option<Secret>,
}

impl HostCredentials {
    /// Credentials for `host` with nothing filled in yet.
    ///
    /// The host is normalized to lowercase.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: normalize_host(&host.into()),
            username: None,
            token: None,
        }
    }

    /// Set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<Secret>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Whether a non-empty token is present.
    pub fn has_token(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Result of a successful interactive login.
///
/// A login that succeeds always carries a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginData {
    /// Host that was logged in to.
    pub host: String,

    /// Account name, if the host reported one.
    pub username: Option<String>,

    /// Token issued by the login.
    pub token: Secret,
}

impl LoginData {
    /// Login result for `host` with `token`. The host is normalized to lowercase.
    pub fn new(host: impl Into<String>, token: impl Into<Secret>) -> Self {
        Self {
            host: normalize_host(&host.into()),
            username: None,
            token: token.into(),
        }
    }

    /// Set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// The login result as credentials for its host.
    pub fn credentials(&self) -> HostCredentials {
        HostCredentials {
            host: self.host.clone(),
            username: self.username.clone(),
            token: Some(self.token.clone()),
        }
    }
}
