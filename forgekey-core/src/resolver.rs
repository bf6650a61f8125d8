//! Resolution of authenticated API clients for remotes.
//!
//! [`CredentialResolver`] tries, in order:
//!
//! 1. a client already cached for the remote's URL,
//! 2. the configured token, if it belongs to the remote's host and validates,
//! 3. credentials from the OS credential helper, if they validate,
//! 4. an interactive login.
//!
//! The first stage that yields credentials wins. Validation and helper
//! failures fall through to the next stage; only a failed login ends the
//! chain without a client.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use forgekey_core::{CredentialResolverBuilder, Remote};
//!
//! let resolver = CredentialResolverBuilder::new().build();
//! let remote = Remote::parse("https://github.com/octocat/hello-world.git").unwrap();
//!
//! if let Some(client) = resolver.resolve(&remote).await.into_client() {
//!     let user = client.current_user().await;
//! }
//! # }
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{default_client_factory, ApiClient, ApiClientFactory, Auth};
use crate::config::{ConfigStore, MemoryConfigStore};
use crate::helper::{CredentialHelper, GitCredentialHelper};
use crate::login::{DeviceCodeLogin, LoginFlow};
use crate::model::{same_host, HostCredentials, Remote};
use crate::validate::{Validator, WebValidator};

/// Which stage of the chain produced a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthSource {
    /// A client was already cached for the URL.
    Cache,
    /// The configured token for the host.
    StoredToken,
    /// The OS credential helper.
    CredentialHelper,
    /// An interactive login.
    InteractiveLogin,
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::StoredToken => write!(f, "stored token"),
            Self::CredentialHelper => write!(f, "credential helper"),
            Self::InteractiveLogin => write!(f, "interactive login"),
        }
    }
}

/// Why no client could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The interactive login failed or was declined.
    LoginFailed(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginFailed(reason) => write!(f, "login failed: {}", reason),
        }
    }
}

/// Outcome of [`CredentialResolver::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A client ready for use.
    Authenticated {
        client: Arc<ApiClient>,
        source: AuthSource,
    },
    /// Authentication could not be established.
    Unavailable(UnavailableReason),
}

impl Resolution {
    /// The client, if one was produced.
    pub fn into_client(self) -> Option<Arc<ApiClient>> {
        match self {
            Self::Authenticated { client, .. } => Some(client),
            Self::Unavailable(_) => None,
        }
    }

    /// The stage that produced the client, if any.
    pub fn source(&self) -> Option<AuthSource> {
        match self {
            Self::Authenticated { source, .. } => Some(*source),
            Self::Unavailable(_) => None,
        }
    }

    /// Whether a client was produced.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Maps remotes to authenticated API clients.
///
/// Clients are cached per remote URL for the lifetime of the resolver.
/// Concurrent resolutions of the same uncached URL are not coordinated:
/// each runs the full chain and the last one to finish owns the cache entry.
pub struct CredentialResolver {
    config: Arc<dyn ConfigStore>,
    validator: Arc<dyn Validator>,
    helper: Arc<dyn CredentialHelper>,
    login: Arc<dyn LoginFlow>,
    client_factory: ApiClientFactory,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl CredentialResolver {
    /// Create a resolver from its collaborators.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        validator: Arc<dyn Validator>,
        helper: Arc<dyn CredentialHelper>,
        login: Arc<dyn LoginFlow>,
        client_factory: ApiClientFactory,
    ) -> Self {
        Self {
            config,
            validator,
            helper,
            login,
            client_factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached client.
    pub fn reset(&self) {
        let mut clients = self.clients.lock();
        debug!("clearing {} cached client(s)", clients.len());
        clients.clear();
    }

    /// Client cached for `url`, if any.
    pub fn cached(&self, url: &str) -> Option<Arc<ApiClient>> {
        self.clients.lock().get(url).cloned()
    }

    /// Number of cached clients.
    pub fn cache_len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Produce an authenticated client for `remote`.
    pub async fn resolve(&self, remote: &Remote) -> Resolution {
        if let Some(client) = self.cached(remote.url()) {
            debug!("using cached client for {}", remote);
            return Resolution::Authenticated {
                client,
                source: AuthSource::Cache,
            };
        }

        if let Some(resolution) = self.try_stored_token(remote).await {
            return resolution;
        }

        if let Some(resolution) = self.try_credential_helper(remote).await {
            return resolution;
        }

        self.interactive_login(remote).await
    }

    async fn try_stored_token(&self, remote: &Remote) -> Option<Resolution> {
        let creds = self.config.current();
        if !same_host(&creds.host, remote.host()) || !creds.has_token() {
            debug!("no stored token for {}", remote.host());
            return None;
        }

        if !self.validated(remote, &creds).await {
            return None;
        }

        let token = creds.token?;
        Some(self.authenticate(Auth::Token(token), remote, AuthSource::StoredToken))
    }

    async fn try_credential_helper(&self, remote: &Remote) -> Option<Resolution> {
        let found = match self.helper.lookup(remote.url()).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!("credential helper has nothing for {}", remote);
                return None;
            }
            Err(e) => {
                debug!("credential helper failed for {}: {}", remote, e);
                return None;
            }
        };

        self.config
            .set_in_memory(Some(found.username.clone()), Some(found.password.clone()));
        let creds = self.config.current();

        if !self.validated(remote, &creds).await {
            return None;
        }

        let auth = Auth::Basic {
            username: found.username,
            password: found.password,
        };
        Some(self.authenticate(auth, remote, AuthSource::CredentialHelper))
    }

    async fn interactive_login(&self, remote: &Remote) -> Resolution {
        let login = match self.login.login().await {
            Ok(login) => login,
            Err(e) => {
                warn!("interactive login for {} failed: {}", remote.host(), e);
                return Resolution::Unavailable(UnavailableReason::LoginFailed(e.to_string()));
            }
        };

        if same_host(&login.host, remote.host()) {
            if let Err(e) = self
                .config
                .update(login.username, Some(login.token.clone()))
                .await
            {
                warn!("could not persist credentials for {}: {}", login.host, e);
            }
        } else {
            debug!(
                "login returned credentials for {} while resolving {}; not persisting",
                login.host,
                remote.host()
            );
        }

        // A host mismatch still authenticates with the token the login returned.
        self.authenticate(Auth::Token(login.token), remote, AuthSource::InteractiveLogin)
    }

    async fn validated(&self, remote: &Remote, creds: &HostCredentials) -> bool {
        match self.validator.validate(remote.host(), creds).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("credentials rejected by {}", remote.host());
                false
            }
            Err(e) => {
                debug!("validation against {} failed: {}", remote.host(), e);
                false
            }
        }
    }

    fn authenticate(&self, auth: Auth, remote: &Remote, source: AuthSource) -> Resolution {
        let mut client = (self.client_factory)(remote.host());
        client.authenticate(auth);
        let client = Arc::new(client);

        self.clients
            .lock()
            .insert(remote.url().to_string(), Arc::clone(&client));

        info!("authenticated {} via {}", remote, source);
        Resolution::Authenticated { client, source }
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("cached_clients", &self.cache_len())
            .finish()
    }
}

/// Builder for a [`CredentialResolver`] with real collaborators by default.
///
/// Defaults: an in-memory config for `github.com`, [`WebValidator`],
/// [`GitCredentialHelper`] and a [`DeviceCodeLogin`] for the config's host
/// without a client ID (so login fails until one is supplied).
#[derive(Default)]
pub struct CredentialResolverBuilder {
    config: Option<Arc<dyn ConfigStore>>,
    validator: Option<Arc<dyn Validator>>,
    helper: Option<Arc<dyn CredentialHelper>>,
    login: Option<Arc<dyn LoginFlow>>,
    client_factory: Option<ApiClientFactory>,
}

impl CredentialResolverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration store.
    pub fn config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the validator.
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the OS credential helper.
    pub fn helper(mut self, helper: Arc<dyn CredentialHelper>) -> Self {
        self.helper = Some(helper);
        self
    }

    /// Set the interactive login flow.
    pub fn login(mut self, login: Arc<dyn LoginFlow>) -> Self {
        self.login = Some(login);
        self
    }

    /// Set how unauthenticated clients are constructed.
    pub fn client_factory(mut self, factory: ApiClientFactory) -> Self {
        self.client_factory = Some(factory);
        self
    }

    /// Build the resolver.
    pub fn build(self) -> CredentialResolver {
        let config: Arc<dyn ConfigStore> = match self.config {
            Some(config) => config,
            None => Arc::new(MemoryConfigStore::default()),
        };
        let login: Arc<dyn LoginFlow> = match self.login {
            Some(login) => login,
            None => Arc::new(DeviceCodeLogin::new(config.current().host, None)),
        };
        let validator: Arc<dyn Validator> = match self.validator {
            Some(validator) => validator,
            None => Arc::new(WebValidator::new()),
        };
        let helper: Arc<dyn CredentialHelper> = match self.helper {
            Some(helper) => helper,
            None => Arc::new(GitCredentialHelper::new()),
        };

        CredentialResolver::new(
            config,
            validator,
            helper,
            login,
            self.client_factory.unwrap_or_else(default_client_factory),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_accessors() {
        let client = Arc::new(ApiClient::for_host("github.com"));
        let resolution = Resolution::Authenticated {
            client: Arc::clone(&client),
            source: AuthSource::StoredToken,
        };
        assert!(resolution.is_authenticated());
        assert_eq!(resolution.source(), Some(AuthSource::StoredToken));
        assert!(Arc::ptr_eq(&resolution.into_client().unwrap(), &client));

        let resolution = Resolution::Unavailable(UnavailableReason::LoginFailed("denied".to_string()));
        assert!(!resolution.is_authenticated());
        assert_eq!(resolution.source(), None);
        assert!(resolution.into_client().is_none());
    }

    #[test]
    fn test_builder_defaults() {
        let resolver = CredentialResolverBuilder::new().build();
        assert_eq!(resolver.cache_len(), 0);
        assert!(resolver.cached("https://github.com/a/b").is_none());
    }

    #[test]
    fn test_auth_source_display() {
        assert_eq!(AuthSource::CredentialHelper.to_string(), "credential helper");
        assert_eq!(
            UnavailableReason::LoginFailed("denied".to_string()).to_string(),
            "login failed: denied"
        );
    }
}
