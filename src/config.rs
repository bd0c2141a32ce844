/// Configuration management for the Courier backend
use crate::error::{CourierError, CourierResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub push: Option<PushConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for verifying bearer tokens issued by the auth provider
    pub jwt_secret: String,
}

/// Push gateway configuration. Absent means push relay is disabled and
/// messages stay queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CourierResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("COURIER_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("COURIER_PORT")
            .unwrap_or_else(|_| "8700".to_string())
            .parse()
            .map_err(|_| CourierError::Validation("Invalid port number".to_string()))?;
        let version = env::var("COURIER_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("COURIER_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("COURIER_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("courier.sqlite"));

        let jwt_secret = env::var("COURIER_JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string());

        let push = match env::var("COURIER_PUSH_GATEWAY_URL") {
            Ok(gateway_url) if !gateway_url.is_empty() => Some(PushConfig {
                gateway_url,
                api_key: env::var("COURIER_PUSH_API_KEY").ok(),
                timeout_secs: env::var("COURIER_PUSH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            }),
            _ => None,
        };

        let level = env::var("COURIER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig { jwt_secret },
            push,
            logging: LoggingConfig { level },
        })
    }

    /// Validate configuration at startup
    pub fn validate(&self) -> CourierResult<()> {
        if self.authentication.jwt_secret.is_empty() {
            return Err(CourierError::Validation(
                "JWT secret must not be empty".to_string(),
            ));
        }

        if let Some(ref push) = self.push {
            if !push.gateway_url.starts_with("http://") && !push.gateway_url.starts_with("https://")
            {
                return Err(CourierError::Validation(
                    "Push gateway URL must be an http(s) URL".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = ServerConfig::from_env().unwrap();
        config.authentication.jwt_secret = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_gateway_url() {
        let mut config = ServerConfig::from_env().unwrap();
        config.push = Some(PushConfig {
            gateway_url: "ftp://push.example".to_string(),
            api_key: None,
            timeout_secs: 10,
        });
        assert!(config.validate().is_err());
    }
}
