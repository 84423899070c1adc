use std::collections::HashMap;
use thiserror::Error;

/// Process configuration, built once at startup and passed explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub env: String,
    pub chat_enabled: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

const DEV_JWT_SECRET: &str = "dev-secret-do-not-use-in-production";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = env_map
            .get("ENV")
            .cloned()
            .unwrap_or_else(|| "development".to_string());

        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let db_path = env_map
            .get("DB_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DB_PATH".to_string()))?;

        let db_max_connections = env_map
            .get("DB_MAX_CONNECTIONS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "DB_MAX_CONNECTIONS".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?;

        let jwt_secret = match env_map.get("JWT_SECRET") {
            Some(secret) => {
                if env == "production" && secret.len() < 32 {
                    return Err(ConfigError::InvalidValue(
                        "JWT_SECRET".to_string(),
                        "must be at least 32 characters in production".to_string(),
                    ));
                }
                secret.clone()
            }
            None if env == "production" => {
                return Err(ConfigError::MissingEnv("JWT_SECRET".to_string()))
            }
            None => DEV_JWT_SECRET.to_string(),
        };

        let chat_enabled = match env_map.get("CHAT_ENABLED").map(|s| s.as_str()) {
            None => true,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "CHAT_ENABLED".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        Ok(Config {
            port,
            db_path,
            db_max_connections,
            jwt_secret,
            env,
            chat_enabled,
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}
