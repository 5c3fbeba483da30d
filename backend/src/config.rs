//! Configuration management for the Shelter Volunteers platform
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with SVP_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::StorageBackend;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Base URL of the single-page frontend, used in emailed links
    pub frontend_url: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Outbound email configuration
    pub email: EmailConfig,

    /// GroupMe bot configuration
    pub groupme: GroupMeConfig,

    /// Image and document storage configuration
    pub storage: StorageConfig,

    /// Site settings cache configuration
    pub settings: SettingsConfig,

    /// Optional first-run administrator account
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,

    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,

    /// Largest accepted request body (uploads included)
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens
    pub secret: String,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,

    /// Refresh token expiration in seconds
    pub refresh_token_expiry: i64,

    /// Password reset token expiration in seconds
    pub reset_token_expiry: i64,
}

/// Which email transport to use
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Disabled,
    Smtp,
    Resend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub provider: EmailProvider,

    /// RFC 5322 "From" address
    pub from_address: String,

    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,

    pub resend_api_key: Option<String>,
    pub resend_endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupMeConfig {
    pub enabled: bool,

    /// GroupMe API base URL
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Where uploaded images are stored
    pub backend: StorageBackend,

    pub azure_account: Option<String>,
    pub azure_container: Option<String>,
    pub azure_sas_token: Option<String>,

    /// Longest side of a stored image, in pixels
    pub image_max_dimension: u32,

    /// Longest side of a thumbnail, in pixels
    pub thumbnail_dimension: u32,

    /// Largest accepted protocol document
    pub max_document_bytes: usize,

    /// Largest accepted image upload
    pub max_image_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    /// Seconds a loaded settings snapshot stays fresh
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub admin_name: Option<String>,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("SVP_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("frontend_url", "http://localhost:5173")?
            .set_default("server.port", 8080)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.cors_origins", Vec::<String>::new())?
            .set_default("server.max_upload_bytes", 25 * 1024 * 1024)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("jwt.access_token_expiry", 3600)?
            .set_default("jwt.refresh_token_expiry", 2_592_000)?
            .set_default("jwt.reset_token_expiry", 3600)?
            .set_default("email.provider", "disabled")?
            .set_default("email.from_address", "noreply@shelter-volunteers.local")?
            .set_default("email.smtp_port", 587)?
            .set_default("email.resend_endpoint", "https://api.resend.com/emails")?
            .set_default("groupme.enabled", false)?
            .set_default("groupme.api_url", "https://api.groupme.com/v3")?
            .set_default("storage.backend", "postgres")?
            .set_default("storage.image_max_dimension", 1600)?
            .set_default("storage.thumbnail_dimension", 320)?
            .set_default("storage.max_document_bytes", 20 * 1024 * 1024)?
            .set_default("storage.max_image_bytes", 15 * 1024 * 1024)?
            .set_default("settings.cache_ttl_secs", 60)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (SVP_ prefix)
            .add_source(
                Environment::with_prefix("SVP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would only fail later at request time
    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 && self.environment == "production" {
            return Err(ConfigError::Message(
                "jwt.secret must be at least 32 bytes in production".to_string(),
            ));
        }
        match self.email.provider {
            EmailProvider::Smtp if self.email.smtp_host.is_none() => {
                return Err(ConfigError::Message(
                    "email.smtp_host is required when email.provider = smtp".to_string(),
                ));
            }
            EmailProvider::Resend if self.email.resend_api_key.is_none() => {
                return Err(ConfigError::Message(
                    "email.resend_api_key is required when email.provider = resend".to_string(),
                ));
            }
            _ => {}
        }
        if self.storage.backend == StorageBackend::Azure
            && (self.storage.azure_account.is_none() || self.storage.azure_container.is_none())
        {
            return Err(ConfigError::Message(
                "storage.azure_account and storage.azure_container are required for azure storage"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: Vec::new(),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Configuration for tests and local tooling; talks to no external services
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Self {
            environment: "test".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/svp_test".to_string(),
                max_connections: 2,
                min_connections: 0,
                acquire_timeout_secs: 5,
            },
            jwt: JwtConfig {
                secret: "test-secret-test-secret-test-secret".to_string(),
                access_token_expiry: 3600,
                refresh_token_expiry: 86400,
                reset_token_expiry: 3600,
            },
            email: EmailConfig {
                provider: EmailProvider::Disabled,
                from_address: "noreply@test.local".to_string(),
                smtp_host: None,
                smtp_port: 587,
                smtp_user: None,
                smtp_password: None,
                resend_api_key: None,
                resend_endpoint: "https://api.resend.com/emails".to_string(),
            },
            groupme: GroupMeConfig {
                enabled: false,
                api_url: "https://api.groupme.com/v3".to_string(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Postgres,
                azure_account: None,
                azure_container: None,
                azure_sas_token: None,
                image_max_dimension: 1600,
                thumbnail_dimension: 320,
                max_document_bytes: 20 * 1024 * 1024,
                max_image_bytes: 15 * 1024 * 1024,
            },
            settings: SettingsConfig { cache_ttl_secs: 60 },
            bootstrap: BootstrapConfig::default(),
        }
    }
}
