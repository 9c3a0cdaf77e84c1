use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use reqwest::Url;

use crate::error::ConfigError;
use crate::gateway::rate_limit;

/// Which of the three services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// User registry, login and key distribution.
    Identity,
    /// Edge: verifies credentials and forwards identity.
    Gateway,
    /// Internal task service with the event bus.
    Tasks,
}

impl ServiceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceRole::Identity => "identity",
            ServiceRole::Gateway => "gateway",
            ServiceRole::Tasks => "tasks",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            ServiceRole::Identity => 3001,
            ServiceRole::Gateway => 3000,
            ServiceRole::Tasks => 4000,
        }
    }

    fn default_ws_port(self) -> u16 {
        match self {
            ServiceRole::Gateway => 3003,
            ServiceRole::Identity | ServiceRole::Tasks => 4001,
        }
    }
}

impl FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "identity" => Ok(ServiceRole::Identity),
            "gateway" => Ok(ServiceRole::Gateway),
            "tasks" => Ok(ServiceRole::Tasks),
            _ => Err(ConfigError::Invalid {
                key: "SERVICE_ROLE",
                value: value.to_string(),
                reason: "expected identity, gateway or tasks".into(),
            }),
        }
    }
}

pub struct Config {
    pub role: ServiceRole,
    pub server_host: String,
    pub server_port: u16,
    pub ws_port: u16,
    pub key_source_url: Url,
    pub jwt_algorithm: Algorithm,
    pub key_retry_delay: Duration,
    pub identity_service_url: Url,
    pub tasks_service_url: Url,
    pub tasks_ws_url: Url,
    pub forwarding_secret: Option<String>,
    pub subscriber_buffer: usize,
    pub jwt_private_key: Option<String>,
    pub jwt_public_key: Option<String>,
    pub cors_origins: Vec<String>,
    /// Requests one client IP may make per `rate_limit_window` at the gateway.
    pub rate_limit_max: NonZeroU32,
    pub rate_limit_window: Duration,
    /// Start the tasks service with sample tasks.
    pub seed_demo_tasks: bool,
}

impl Config {
    /// Reads the process configuration from the environment.
    ///
    /// Any malformed value is a startup error; `main` refuses to start on it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let role: ServiceRole = var_or("SERVICE_ROLE", "gateway").parse()?;

        Ok(Self {
            role,
            server_host: var_or("SERVER_HOST", "127.0.0.1"),
            server_port: parse_var("SERVER_PORT", role.default_port())?,
            ws_port: parse_var("WS_PORT", role.default_ws_port())?,
            key_source_url: url_var(
                "KEY_SOURCE_URL",
                "http://localhost:3001/api/users/public-key",
            )?,
            jwt_algorithm: algorithm_var("JWT_ALGORITHM")?,
            key_retry_delay: Duration::from_millis(parse_var("KEY_RETRY_DELAY_MS", 5000)?),
            identity_service_url: url_var("IDENTITY_SERVICE_URL", "http://localhost:3001")?,
            tasks_service_url: url_var("TASKS_SERVICE_URL", "http://localhost:4000")?,
            tasks_ws_url: url_var("TASKS_WS_URL", "ws://localhost:4001")?,
            forwarding_secret: env::var("FORWARDING_SECRET").ok().filter(|s| !s.is_empty()),
            subscriber_buffer: parse_var("SUBSCRIBER_BUFFER", 64)?,
            jwt_private_key: pem_var("JWT_PRIVATE_KEY"),
            jwt_public_key: pem_var("JWT_PUBLIC_KEY"),
            cors_origins: var_or(
                "CORS_ORIGINS",
                "http://localhost:3002,http://localhost:3000,http://frontend-app:3002",
            )
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
            rate_limit_max: parse_var("RATE_LIMIT_MAX", rate_limit::default_max_requests())?,
            rate_limit_window: Duration::from_secs(parse_var(
                "RATE_LIMIT_WINDOW_SECS",
                rate_limit::DEFAULT_WINDOW.as_secs(),
            )?),
            seed_demo_tasks: parse_var("SEED_DEMO_TASKS", false)?,
        })
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.ws_port)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn url_var(key: &'static str, default: &str) -> Result<Url, ConfigError> {
    let value = var_or(key, default);
    Url::parse(&value).map_err(|e| ConfigError::Invalid {
        key,
        value,
        reason: e.to_string(),
    })
}

/// PEM text from a single-line variable may carry literal `\n` escapes.
fn pem_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.replace("\\n", "\n"))
}

fn algorithm_var(key: &'static str) -> Result<Algorithm, ConfigError> {
    match var_or(key, "RS256").as_str() {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "EdDSA" => Ok(Algorithm::EdDSA),
        other => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected RS256, RS384, RS512 or EdDSA".into(),
        }),
    }
}
