//! Top-level error types for forgekey.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::helper::HelperError;
use crate::login::LoginError;
use crate::model::ModelError;
use crate::validate::ValidateError;

/// Top-level error type encompassing all forgekey errors.
#[derive(Debug, Error)]
pub enum ForgekeyError {
    /// Invalid remote or other model input.
    #[error("invalid input: {0}")]
    Model(#[from] ModelError),

    /// Error from configuration storage.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error from credential validation.
    #[error("validation error: {0}")]
    Validate(#[from] ValidateError),

    /// Error from the OS credential helper.
    #[error("credential helper error: {0}")]
    Helper(#[from] HelperError),

    /// Error from the interactive login.
    #[error("login error: {0}")]
    Login(#[from] LoginError),

    /// Error from API requests.
    #[error("API error: {0}")]
    Client(#[from] ClientError),
}

/// Result type for forgekey operations.
pub type Result<T> = std::result::Result<T, ForgekeyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Remote;

    fn parse_remote(url: &str) -> Result<Remote> {
        Ok(Remote::parse(url)?)
    }

    #[test]
    fn test_model_error_converts() {
        let err = parse_remote("not a remote").unwrap_err();
        assert!(matches!(err, ForgekeyError::Model(_)));
        assert!(err.to_string().starts_with("invalid input: invalid remote"));
    }
}
