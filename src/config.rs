// src/config.rs - Environment-driven configuration
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use tracing::info;

use crate::models::constants;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_ms: u64,
    pub enable_ssl: bool,
}

/// PostgREST endpoint of the Supabase project. When `url` is unset the
/// service talks to Postgres directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub freshness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub slow_request_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_format: String, // json, text
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn load() -> Result<Self> {
        let database = DatabaseConfig {
            host: env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("DATABASE_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .context("Invalid DATABASE_PORT")?,
            database: env::var("DATABASE_NAME").unwrap_or_else(|_| "postgres".to_string()),
            username: env::var("DATABASE_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
            password: env::var("DATABASE_PASSWORD").unwrap_or_default(),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid DATABASE_MIN_CONNECTIONS")?,
            connection_timeout_ms: env::var("DATABASE_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .context("Invalid DATABASE_TIMEOUT_MS")?,
            enable_ssl: env::var("DATABASE_ENABLE_SSL")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid DATABASE_ENABLE_SSL")?,
        };

        let remote = RemoteConfig {
            url: env::var("SUPABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            api_key: env::var("SUPABASE_ANON_KEY").ok(),
            table: env::var("PORTFOLIO_TABLE")
                .unwrap_or_else(|_| constants::PORTFOLIO_TABLE.to_string()),
            request_timeout_ms: env::var("SUPABASE_TIMEOUT_MS")
                .unwrap_or_else(|_| "15000".to_string())
                .parse()
                .context("Invalid SUPABASE_TIMEOUT_MS")?,
        };

        let cache = CacheConfig {
            freshness_secs: env::var("CACHE_FRESHNESS_SECS")
                .unwrap_or_else(|_| constants::CACHE_FRESHNESS_SECS.to_string())
                .parse()
                .context("Invalid CACHE_FRESHNESS_SECS")?,
        };

        let server = ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
            enable_cors: env::var("SERVER_ENABLE_CORS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid SERVER_ENABLE_CORS")?,
            slow_request_ms: env::var("SERVER_SLOW_REQUEST_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("Invalid SERVER_SLOW_REQUEST_MS")?,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };

        let config = Self {
            database,
            remote,
            cache,
            server,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Local setup: Postgres on localhost, verbose logs
    pub fn development() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "postgres".to_string(),
                username: "postgres".to_string(),
                password: String::new(),
                max_connections: 2,
                min_connections: 1,
                connection_timeout_ms: 5000,
                enable_ssl: false,
            },
            remote: RemoteConfig {
                url: None,
                api_key: None,
                table: constants::PORTFOLIO_TABLE.to_string(),
                request_timeout_ms: 15_000,
            },
            cache: CacheConfig {
                freshness_secs: constants::CACHE_FRESHNESS_SECS,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                enable_cors: true,
                slow_request_ms: 500,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                log_format: "text".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.url.is_none() && self.database.host.is_empty() {
            return Err(anyhow::anyhow!(
                "Either SUPABASE_URL or DATABASE_HOST must be set"
            ));
        }
        if self.remote.url.is_some() && self.remote.api_key.is_none() {
            return Err(anyhow::anyhow!("SUPABASE_ANON_KEY is required with SUPABASE_URL"));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "Max connections must be >= min connections"
            ));
        }
        if self.remote.table.is_empty() {
            return Err(anyhow::anyhow!("Portfolio table name cannot be empty"));
        }
        if self.cache.freshness_secs == 0 {
            return Err(anyhow::anyhow!("Cache freshness window must be > 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be valid"));
        }
        Ok(())
    }

    /// Log the effective settings at startup (secrets omitted)
    pub fn log_summary(&self) {
        match &self.remote.url {
            Some(url) => info!("Remote: PostgREST at {}", url),
            None => info!(
                "Remote: Postgres at {}:{}/{}",
                self.database.host, self.database.port, self.database.database
            ),
        }
        info!("Portfolio table: {}", self.remote.table);
        info!("Cache freshness window: {}s", self.cache.freshness_secs);
        info!("Server: {}:{}", self.server.host, self.server.port);
        info!("Log level: {} ({})", self.logging.level, self.logging.log_format);
    }
}

impl CacheConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

impl DatabaseConfig {
    /// Get connection options, requiring TLS when enabled
    pub fn connection_options(&self) -> sqlx::postgres::PgConnectOptions {
        let mut options = sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .application_name("portfolio_access");

        if self.enable_ssl {
            options = options.ssl_mode(sqlx::postgres::PgSslMode::Require);
        }

        options
    }
}
