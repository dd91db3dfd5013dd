use std::{env, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// Which document store backs the forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            _ => Err(ConfigError::Invalid {
                name: "STORE_BACKEND",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub upload_dir: String,
    pub public_base_url: String,
    pub max_upload_size: usize,
    pub allowed_origins: Vec<String>,
    pub feed_default_limit: usize,
    pub transaction_max_attempts: u32,
    /// Seconds since the last heartbeat during which a user counts as online.
    pub presence_window_secs: i64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend: StoreBackend = var_or("STORE_BACKEND", "memory").parse()?;
        let database_url = env::var("DATABASE_URL").ok();
        let redis_url = env::var("REDIS_URL").ok();

        if store_backend == StoreBackend::Postgres {
            if database_url.is_none() {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
            if redis_url.is_none() {
                return Err(ConfigError::Missing("REDIS_URL"));
            }
        }

        Ok(Self {
            host: var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", 3000)?,
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            store_backend,
            database_url,
            redis_url,
            upload_dir: var_or("UPLOAD_DIR", "./uploads"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000"),
            max_upload_size: parse_var("MAX_UPLOAD_SIZE", 5 * 1024 * 1024)?, // 5MB default
            allowed_origins: var_or("ALLOWED_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            feed_default_limit: parse_var("FEED_DEFAULT_LIMIT", 25)?,
            transaction_max_attempts: parse_var("TRANSACTION_MAX_ATTEMPTS", 5)?,
            presence_window_secs: parse_var("PRESENCE_WINDOW_SECS", 30)?,
        })
    }

    /// Settings for tests and local tooling; nothing is read from the environment.
    pub fn for_development(jwt_secret: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            jwt_secret: jwt_secret.to_string(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            redis_url: None,
            upload_dir: "./uploads".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            max_upload_size: 5 * 1024 * 1024,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            feed_default_limit: 25,
            transaction_max_attempts: 5,
            presence_window_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_backend() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(" Postgres ".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert!(matches!(
            "sqlite".parse::<StoreBackend>(),
            Err(ConfigError::Invalid { name: "STORE_BACKEND", .. })
        ));
    }
}
