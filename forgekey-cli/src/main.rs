//! forgekey CLI
//!
//! Command-line interface for resolving credentials for repository remotes.
//!
//! # Usage
//!
//! ```bash
//! # Authenticate against a remote (stored token, git credential helper, or login)
//! forgekey resolve git@github.com:octocat/hello-world.git
//!
//! # Log in to a host through the device flow
//! forgekey login --host github.com
//!
//! # Show what is configured
//! forgekey status
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use forgekey_core::login::DeviceAuthorization;
use forgekey_core::model::same_host;
use forgekey_core::{
    ConfigStore, CredentialResolverBuilder, DeviceCodeLogin, FileConfigStore, LoginFlow, Remote,
    Resolution,
};

#[derive(Parser)]
#[command(name = "forgekey")]
#[command(about = "Resolve authenticated API access for repository remotes")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate against a remote and show who we are
    Resolve {
        /// Remote URL (https, ssh, or user@host:path)
        remote: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Log in to a host through the device flow and save the token
    Login {
        /// Host to log in to (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show the configured host and credentials
    Status,

    /// Forget the stored username and token
    Logout,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve { remote, format } => resolve(config, &remote, format).await,
        Commands::Login { host } => login(config, host).await,
        Commands::Status => status(&config),
        Commands::Logout => logout(&config).await,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<Arc<FileConfigStore>> {
    let store = match path {
        Some(path) => FileConfigStore::load_from_path(path),
        None => FileConfigStore::load(),
    }
    .context("Failed to load configuration")?;

    debug!("using config at {:?}", store.path());
    Ok(Arc::new(store))
}

fn print_device_prompt(auth: &DeviceAuthorization) {
    eprintln!("First copy your one-time code: {}", auth.user_code);
    eprintln!("Then open {} in your browser to authorize forgekey.", auth.verification_uri);
}

fn device_login(config: &FileConfigStore, host: &str) -> DeviceCodeLogin {
    DeviceCodeLogin::new(host, config.client_id()).with_prompt(print_device_prompt)
}

async fn resolve(config: Arc<FileConfigStore>, remote: &str, format: OutputFormat) -> Result<()> {
    let remote = Remote::parse(remote).context("Failed to parse remote")?;

    let resolver = CredentialResolverBuilder::new()
        .login(Arc::new(device_login(&config, remote.host())))
        .config(config)
        .build();

    let (client, source) = match resolver.resolve(&remote).await {
        Resolution::Authenticated { client, source } => (client, source),
        Resolution::Unavailable(reason) => {
            bail!("Could not authenticate to {}: {}", remote.host(), reason)
        }
    };

    let user = client
        .current_user()
        .await
        .with_context(|| format!("Authenticated to {} but could not fetch user", remote.host()))?;

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "remote": remote.url(),
                "host": remote.host(),
                "user": user.login,
                "source": source.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Authenticated to {} as {} (via {})", remote.host(), user.login, source);
        }
    }
    Ok(())
}

async fn login(config: Arc<FileConfigStore>, host: Option<String>) -> Result<()> {
    if let Some(host) = host {
        if !same_host(&host, &config.current().host) {
            config
                .set_host(host)
                .await
                .context("Failed to switch configured host")?;
        }
    }

    let host = config.current().host;
    let login = device_login(&config, &host)
        .login()
        .await
        .with_context(|| format!("Login to {} failed", host))?;

    let username = login.username.clone();
    config
        .update(login.username, Some(login.token))
        .await
        .context("Failed to save credentials")?;

    match username {
        Some(username) => println!("Logged in to {} as {}", host, username),
        None => println!("Logged in to {}", host),
    }
    Ok(())
}

fn status(config: &FileConfigStore) -> Result<()> {
    let snapshot = config.snapshot();

    println!("Config:   {}", config.path().display());
    println!("Host:     {}", snapshot.host);
    println!(
        "Username: {}",
        snapshot.username.as_deref().unwrap_or("(none)")
    );
    println!(
        "Token:    {}",
        if config.current().has_token() { "set" } else { "(none)" }
    );
    if let Some(updated_at) = snapshot.updated_at {
        println!("Updated:  {}", updated_at.to_rfc3339());
    }
    if snapshot.client_id.is_none() {
        println!("Note: no client_id configured; `forgekey login` needs one.");
    }
    Ok(())
}

async fn logout(config: &FileConfigStore) -> Result<()> {
    config
        .update(None, None)
        .await
        .context("Failed to clear credentials")?;
    println!("Cleared credentials for {}", config.current().host);
    Ok(())
}
