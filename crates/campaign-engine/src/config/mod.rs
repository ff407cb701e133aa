use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub campaigns: CampaignConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let cache_ttl_seconds = read_u64("CAMPAIGN_CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECONDS)?;
        let purge_max_age_minutes = read_u64(
            "CAMPAIGN_CACHE_MAX_AGE_MINUTES",
            DEFAULT_PURGE_MAX_AGE_MINUTES,
        )?;
        let cron_secret = env::var("CRON_SECRET")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            campaigns: CampaignConfig {
                cache_ttl_seconds,
                purge_max_age_minutes,
                cron_secret,
            },
        })
    }
}

const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
const DEFAULT_PURGE_MAX_AGE_MINUTES: u64 = 5;

fn read_u64(variable: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Snapshot cache defaults and the shared secret guarding the purge endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignConfig {
    pub cache_ttl_seconds: u64,
    pub purge_max_age_minutes: u64,
    pub cron_secret: Option<String>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            purge_max_age_minutes: DEFAULT_PURGE_MAX_AGE_MINUTES,
            cron_secret: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
