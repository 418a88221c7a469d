use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use parley_session::SessionSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub session: SessionSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set but
    /// unparsable values are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "PARLEY_PORT", 4000)?;
        let db_path: PathBuf = lookup("PARLEY_DB_PATH")
            .unwrap_or_else(|| "parley.db".into())
            .into();
        let poll_ms: u64 = parse_or(&lookup, "PARLEY_POLL_INTERVAL_MS", 500)?;
        let max_attempts: u32 = parse_or(&lookup, "PARLEY_MAX_ATTEMPTS", 3)?;
        let min_password_len: usize = parse_or(&lookup, "PARLEY_MIN_PASSWORD_LEN", 6)?;

        anyhow::ensure!(poll_ms > 0, "PARLEY_POLL_INTERVAL_MS must be positive");
        anyhow::ensure!(max_attempts > 0, "PARLEY_MAX_ATTEMPTS must be positive");

        Ok(Self {
            host,
            port,
            db_path,
            session: SessionSettings {
                poll_interval: Duration::from_millis(poll_ms),
                max_attempts,
                min_password_len,
            },
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}
