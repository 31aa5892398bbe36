// src/config.rs

//! Server configuration, resolved from the command line and environment.
//! One positional argument selects the listen port; the `DB_*` variables
//! configure the MySQL connection.

use anyhow::{Context, Result};
use std::env;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db: DbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db: DbConfig::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from `argv` and the process environment.
    /// An unparsable port is a startup error.
    pub fn resolve(args: &[String]) -> Result<Self> {
        let mut config = Config {
            db: DbConfig::from_env(),
            ..Config::default()
        };
        if let Some(arg) = args.get(1) {
            config.port = arg
                .parse()
                .with_context(|| format!("invalid listen port: {arg:?}"))?;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            // 127.0.0.1 instead of localhost so the client always uses TCP.
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            name: "im_server".to_string(),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = match env::var("DB_PORT") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                warn!(%value, "invalid DB_PORT, using {}", defaults.port);
                defaults.port
            }),
            Err(_) => defaults.port,
        };
        Self {
            host: env::var("DB_HOST").unwrap_or(defaults.host),
            port,
            user: env::var("DB_USER").unwrap_or(defaults.user),
            password: env::var("DB_PASSWORD").unwrap_or(defaults.password),
            name: env::var("DB_NAME").unwrap_or(defaults.name),
        }
    }
}
