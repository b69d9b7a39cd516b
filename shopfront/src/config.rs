//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` and can be set via the
//! `-f` flag or `SHOPFRONT_CONFIG`.
//!
//! ## Loading priority
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `SHOPFRONT_`-prefixed variables override
//!    YAML values; nested fields use double underscores
//!    (`SHOPFRONT_CACHE__URL=redis://...`)
//! 3. **DATABASE_URL** - special case: overrides `database.url` if set
//!
//! Cache key shapes and TTLs are deliberately *not* configurable - they are
//! part of the service contract (see [`crate::cache::keys`]). Configuration
//! covers deployment concerns only: where to bind, where the stores live,
//! and how cookies are scoped.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SHOPFRONT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Apex domain tenant storefronts hang off of: requests to
    /// `<slug>.<root_domain>` are resolved against the tenant registry.
    pub root_domain: String,
    /// Relational store connection
    pub database: DatabaseConfig,
    /// Key-value store connection
    pub cache: CacheConfig,
    /// Session cookie scoping (the cookie name and lifetime are fixed
    /// constants, see [`crate::auth`])
    pub cookie: CookieConfig,
    /// Authentication behavior
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            root_domain: "localhost".to_string(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            cookie: CookieConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Maximum time to wait for a connection from the pool
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/shopfront".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Valkey/Redis connection URL
    pub url: String,
    /// Deadline applied to every key-value command. A missed deadline is
    /// treated like any other transient store failure.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            command_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CookieConfig {
    /// Cookie Domain attribute; unset scopes the cookie to the exact host
    pub domain: Option<String>,
    /// Whether to set the Secure attribute (on for anything but local dev)
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Whether self-service registration is open
    pub allow_registration: bool,
    /// Minimum accepted password length
    pub password_min_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_registration: true,
            password_min_length: 8,
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and environment overrides.
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Config = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("SHOPFRONT_").split("__"))
            .extract()?;

        // DATABASE_URL wins over everything, matching platform conventions
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_when_no_file() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(&args_for("missing.yaml")).expect("load");
            assert_eq!(config.port, 8080);
            assert_eq!(config.root_domain, "localhost");
            assert_eq!(config.cache.command_timeout, Duration::from_secs(2));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_with_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                "port: 9000\n\
                 root_domain: shopfront.app\n\
                 cache:\n\
                 \x20 url: redis://cache.internal:6379\n\
                 \x20 command_timeout: 500ms\n",
            )?;
            jail.set_env("SHOPFRONT_PORT", "9100");
            jail.set_env("SHOPFRONT_CACHE__URL", "redis://override:6379");

            let config = Config::load(&args_for("config.yaml")).expect("load");
            assert_eq!(config.port, 9100);
            assert_eq!(config.root_domain, "shopfront.app");
            assert_eq!(config.cache.url, "redis://override:6379");
            assert_eq!(config.cache.command_timeout, Duration::from_millis(500));
            Ok(())
        });
    }

    #[test]
    fn test_database_url_special_case() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DATABASE_URL", "postgresql://db.internal/shopfront");

            let config = Config::load(&args_for("missing.yaml")).expect("load");
            assert_eq!(config.database.url, "postgresql://db.internal/shopfront");
            Ok(())
        });
    }
}
