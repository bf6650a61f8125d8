//! OS credential helper lookup through `git credential fill`.
//!
//! Git forwards the query to whatever helper the user configured
//! (osxkeychain, manager, libsecret, store, ...), so this reaches the
//! platform credential store without binding to any one of them.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::secret::Secret;

/// Error type for credential helper lookups.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The helper process could not be started or talked to.
    #[error("failed to run credential helper '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A username/password pair supplied by a credential helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCredentials {
    pub username: String,
    pub password: Secret,
}

/// Looks up stored credentials for a URL.
#[async_trait]
pub trait CredentialHelper: Send + Sync {
    /// Query credentials for `url`.
    ///
    /// `Ok(None)` means no helper had anything for this URL.
    async fn lookup(&self, url: &str) -> Result<Option<HelperCredentials>, HelperError>;
}

/// Credential helper backed by `git credential fill`.
#[derive(Debug, Clone)]
pub struct GitCredentialHelper {
    program: String,
}

impl GitCredentialHelper {
    /// Use `git` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> HelperError {
        HelperError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

impl Default for GitCredentialHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialHelper for GitCredentialHelper {
    async fn lookup(&self, url: &str) -> Result<Option<HelperCredentials>, HelperError> {
        debug!("asking git credential helpers about {}", url);

        let mut child = Command::new(&self.program)
            .args(["credential", "fill"])
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.io_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("url={}\n\n", url).as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let output = child.wait_with_output().await.map_err(|e| self.io_error(e))?;

        if !output.status.success() {
            debug!("git credential fill exited with {}", output.status);
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_credential_output(&stdout))
    }
}

/// Parse the `key=value` lines printed by `git credential fill`.
///
/// Returns credentials only when both a username and a password are present.
pub fn parse_credential_output(output: &str) -> Option<HelperCredentials> {
    let mut username = None;
    let mut password = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "username" => username = Some(value.to_string()),
            "password" => password = Some(Secret::new(value)),
            other => trace!("ignoring credential attribute {}", other),
        }
    }

    Some(HelperCredentials {
        username: username?,
        password: password?,
    })
}
