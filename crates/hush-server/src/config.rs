use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use hush_gateway::ConnectionPolicy;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Secret the static fallback key is derived from.
    pub static_key: String,
    pub handshake_timeout: Duration,
    pub policy: ConnectionPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let port: u16 = var("HUSH_PORT", "3000")
            .parse()
            .context("HUSH_PORT must be a port number")?;
        let handshake_secs: u64 = var("HUSH_HANDSHAKE_TIMEOUT_SECS", "10")
            .parse()
            .context("HUSH_HANDSHAKE_TIMEOUT_SECS must be a whole number of seconds")?;
        let policy = var("HUSH_CONNECTION_POLICY", "multi")
            .parse::<ConnectionPolicy>()
            .map_err(anyhow::Error::msg)
            .context("HUSH_CONNECTION_POLICY must be 'multi' or 'single'")?;

        Ok(Self {
            host: var("HUSH_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("HUSH_DB_PATH", "hush.db")),
            jwt_secret: var("HUSH_JWT_SECRET", "dev-secret-change-me"),
            static_key: var("HUSH_STATIC_KEY", "encrypt-key"),
            handshake_timeout: Duration::from_secs(handshake_secs),
            policy,
        })
    }
}
