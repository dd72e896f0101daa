use crate::proxy::types::{HopByHopPolicy, DEFAULT_COPY_BUFFER_SIZE};
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Prefix for environment overrides, e.g. `MOUNT_PROXY__PROXY__MOUNT_PATH`
pub const ENV_PREFIX: &str = "MOUNT_PROXY";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub proxy: ProxySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub mount_path: String,
    pub target_base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub connection_request_timeout_ms: u64,
    #[serde(default)]
    pub default_headers: Vec<DefaultHeader>,
    /// Static replacement for the caller's `Authorization` header
    #[serde(default)]
    pub authorization: Option<String>,
    /// Static replacement for the caller's `Host` header
    #[serde(default)]
    pub host: Option<String>,
    pub copy_buffer_size: usize,
    pub hop_by_hop: HopByHopPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefaultHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Settings {
    /// Defaults, then `config/default`, `config/{ENVIRONMENT}`, `config/local`,
    /// then `MOUNT_PROXY__*` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Defaults, then a single explicit file, then environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("proxy.mount_path", "/proxy/")?
            .set_default("proxy.target_base_url", "http://127.0.0.1:9000/")?
            .set_default("proxy.connect_timeout_ms", 5_000)?
            .set_default("proxy.read_timeout_ms", 30_000)?
            .set_default("proxy.connection_request_timeout_ms", 0)?
            .set_default("proxy.copy_buffer_size", DEFAULT_COPY_BUFFER_SIZE as u64)?
            .set_default("proxy.hop_by_hop", "pass_through")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
    }
}
