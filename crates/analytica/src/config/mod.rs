mod sources;

pub use sources::{SourceProfile, SourceRegistry};

use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::gate::{GateConfig, DEFAULT_AUTO_APPROVE_THRESHOLD};

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

/// Top-level configuration. Components receive only their own slice.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub validation: ValidationConfig,
    pub store: StoreConfig,
    pub sources_path: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("ANALYTICA_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("ANALYTICA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("ANALYTICA_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("ANALYTICA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let data_dir = env::var("ANALYTICA_DATA_DIR").unwrap_or_else(|_| "data/validation".to_string());
        let auto_approve_threshold = match env::var("ANALYTICA_AUTO_APPROVE") {
            Ok(value) => {
                let threshold = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ConfigError::InvalidThreshold { value: value.clone() })?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(ConfigError::InvalidThreshold { value });
                }
                threshold
            }
            Err(_) => DEFAULT_AUTO_APPROVE_THRESHOLD,
        };

        let database_path =
            env::var("ANALYTICA_DATABASE").unwrap_or_else(|_| "data/analytica.db".to_string());
        let busy_timeout_ms = env::var("ANALYTICA_BUSY_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidBusyTimeout)?;

        let sources_path =
            env::var("ANALYTICA_SOURCES").unwrap_or_else(|_| "config/sources.json".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            validation: ValidationConfig {
                data_dir: PathBuf::from(data_dir),
                gate: GateConfig {
                    auto_approve_threshold,
                },
            },
            store: StoreConfig {
                database_path: PathBuf::from(database_path),
                busy_timeout: Duration::from_millis(busy_timeout_ms),
            },
            sources_path: PathBuf::from(sources_path),
        })
    }

    pub fn sources(&self) -> Result<SourceRegistry, ConfigError> {
        SourceRegistry::load(&self.sources_path)
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where staged batches live and when they approve themselves.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub data_dir: PathBuf,
    pub gate: GateConfig,
}

/// Destination database settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidThreshold { value: String },
    InvalidBusyTimeout,
    SourcesIo { path: PathBuf, source: std::io::Error },
    SourcesFormat { path: PathBuf, source: serde_json::Error },
    InvalidSource { source_name: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "ANALYTICA_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "ANALYTICA_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidThreshold { value } => write!(
                f,
                "ANALYTICA_AUTO_APPROVE must be a number in [0, 1], got '{value}'"
            ),
            ConfigError::InvalidBusyTimeout => {
                write!(f, "ANALYTICA_BUSY_TIMEOUT_MS must be a whole number of milliseconds")
            }
            ConfigError::SourcesIo { path, .. } => {
                write!(f, "unable to read source configuration {}", path.display())
            }
            ConfigError::SourcesFormat { path, source } => {
                write!(f, "source configuration {} is malformed: {source}", path.display())
            }
            ConfigError::InvalidSource {
                source_name,
                reason,
            } => write!(f, "source '{source_name}' is misconfigured: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::SourcesIo { source, .. } => Some(source),
            ConfigError::SourcesFormat { source, .. } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidThreshold { .. }
            | ConfigError::InvalidBusyTimeout
            | ConfigError::InvalidSource { .. } => None,
        }
    }
}
