//! # forgekey Core
//!
//! Resolves authenticated API clients for repository remotes.
//!
//! This crate provides:
//! - Domain types for remotes and host credentials
//! - Traits for the configuration store, validation, the OS credential
//!   helper and interactive login, with default implementations
//! - [`CredentialResolver`], which walks the fallback chain and caches one
//!   client per remote URL
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forgekey_core::{CredentialResolverBuilder, FileConfigStore, Remote};
//!
//! # async fn example() -> forgekey_core::Result<()> {
//! let config = Arc::new(FileConfigStore::load()?);
//! let resolver = CredentialResolverBuilder::new().config(config).build();
//!
//! let remote = Remote::parse("git@github.com:octocat/hello-world.git")?;
//! match resolver.resolve(&remote).await.into_client() {
//!     Some(client) => println!("{}", client.current_user().await?.login),
//!     None => eprintln!("could not authenticate"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod login;
pub mod model;
pub mod resolver;
pub mod secret;
pub mod validate;

// Re-export commonly used types at crate root
pub use model::{
    HostCredentials,
    LoginData,
    ModelError,
    Remote,
};

pub use secret::Secret;

pub use client::{
    ApiClient,
    ApiClientFactory,
    Auth,
    ClientError,
    User,
};

pub use config::{
    ConfigError,
    ConfigStore,
    FileConfigStore,
    MemoryConfigStore,
};

pub use validate::{
    ValidateError,
    Validator,
    WebValidator,
};

pub use helper::{
    CredentialHelper,
    GitCredentialHelper,
    HelperCredentials,
    HelperError,
};

pub use login::{
    DeviceCodeLogin,
    LoginError,
    LoginFlow,
};

pub use resolver::{
    AuthSource,
    CredentialResolver,
    CredentialResolverBuilder,
    Resolution,
    UnavailableReason,
};

pub use error::{ForgekeyError, Result};
