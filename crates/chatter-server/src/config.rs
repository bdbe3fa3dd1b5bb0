use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder secret used when none is configured. Fine for local
/// development, never for a deployed server.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults,
    /// set but unparseable keys are an error.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port: u16 = or("CHATTER_PORT", "8000")
            .parse()
            .context("CHATTER_PORT must be a port number")?;
        let token_ttl_minutes: i64 = or("CHATTER_TOKEN_TTL_MINUTES", "30")
            .parse()
            .context("CHATTER_TOKEN_TTL_MINUTES must be an integer")?;
        if token_ttl_minutes <= 0 {
            bail!("CHATTER_TOKEN_TTL_MINUTES must be positive");
        }
        let max_upload_bytes: usize = or("CHATTER_MAX_UPLOAD_BYTES", "26214400")
            .parse()
            .context("CHATTER_MAX_UPLOAD_BYTES must be a byte count")?;

        Ok(Self {
            host: or("CHATTER_HOST", "0.0.0.0"),
            port,
            db_path: or("CHATTER_DB_PATH", "chatter.db").into(),
            jwt_secret: or("CHATTER_JWT_SECRET", DEV_JWT_SECRET),
            token_ttl_minutes,
            upload_dir: or("CHATTER_UPLOAD_DIR", "uploads").into(),
            static_dir: or("CHATTER_STATIC_DIR", "static").into(),
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }
}
