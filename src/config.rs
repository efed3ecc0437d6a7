use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_hours: i64,
    pub refresh_ttl_hours: i64,
    /// How long after the refresh token's expiry an exchange is still accepted.
    pub refresh_window_secs: i64,
}

impl JwtConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "Library".into(),
            audience: "library-users".into(),
            access_ttl_hours: 24,
            refresh_ttl_hours: 168,
            refresh_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub path: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub cookie: CookieConfig,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(other) => anyhow::bail!("unknown STORE_BACKEND {other:?}"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required for the postgres backend");
        }

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET")?;
        if secret.is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }
        let defaults = JwtConfig::with_secret(secret);
        let jwt = JwtConfig {
            issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.issuer.clone()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.audience.clone()),
            access_ttl_hours: env_parse("JWT_ACCESS_TTL_HOURS").unwrap_or(defaults.access_ttl_hours),
            refresh_ttl_hours: env_parse("JWT_REFRESH_TTL_HOURS")
                .unwrap_or(defaults.refresh_ttl_hours),
            refresh_window_secs: env_parse("JWT_REFRESH_WINDOW_SECS")
                .unwrap_or(defaults.refresh_window_secs),
            ..defaults
        };

        let cookie = CookieConfig {
            path: std::env::var("REFRESH_COOKIE_PATH").unwrap_or_else(|_| "/".into()),
            secure: env_parse("COOKIE_SECURE").unwrap_or(true),
        };

        Ok(Self {
            backend,
            database_url,
            jwt,
            cookie,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(10),
        })
    }

    /// Configuration for an in-memory instance; used by tests and local demos.
    pub fn in_memory(secret: &str) -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig::with_secret(secret),
            cookie: CookieConfig {
                path: "/".into(),
                secure: true,
            },
            request_timeout_secs: 10,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
