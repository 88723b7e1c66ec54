use std::env;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_FILTER: &str = "sentinelle=info";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        Ok(Self::with_overrides(
            database_url,
            env::var("SENTINELLE_MAX_CONNECTIONS").ok().as_deref(),
            env::var("SENTINELLE_CONNECT_TIMEOUT_SECS").ok().as_deref(),
        ))
    }

    fn with_overrides(
        database_url: String,
        max_connections: Option<&str>,
        connect_timeout_secs: Option<&str>,
    ) -> Self {
        let max_connections = parse_or_default(
            "SENTINELLE_MAX_CONNECTIONS",
            max_connections,
            DEFAULT_MAX_CONNECTIONS,
        )
        .max(1);
        let connect_timeout_secs = parse_or_default(
            "SENTINELLE_CONNECT_TIMEOUT_SECS",
            connect_timeout_secs,
            DEFAULT_CONNECT_TIMEOUT_SECS,
        );

        Self {
            database_url,
            max_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        }
    }
}

fn parse_or_default<T>(name: &str, raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring invalid {name}={value:?}, using {default}");
            default
        }),
    }
}
