//! Configuration (spec §7 "Configuration"): a layered `Config`, modelled on
//! the teacher's `ServerConfig`/`ConfigOverrides` pair. Loading (file
//! discovery, CLI parsing) is a `coordinator-api` concern; this module only
//! owns the shape and the override-application rules.

use std::path::PathBuf;

use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_TOML: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub dispatch: DispatchSection,
    pub cache: CacheSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

/// The core's timing knobs: liveness window W, sweep cadence, dispatch-scan
/// cadence, and the default request deadline (spec §5, §7).
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    pub liveness_window_secs: u64,
    pub sweep_cadence_secs: u64,
    pub dispatch_scan_cadence_secs: u64,
    pub request_deadline_secs: u64,
}

impl DispatchSection {
    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_secs as i64)
    }

    pub fn request_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub agent_ttl_secs: u64,
    pub entity_ttl_secs: u64,
    pub job_ttl_secs: u64,
    pub max_subscriber_buffer: usize,
}

impl CacheSection {
    pub fn to_ttls(&self) -> crate::cache::CacheTtls {
        crate::cache::CacheTtls {
            agent: std::time::Duration::from_secs(self.agent_ttl_secs),
            entity: std::time::Duration::from_secs(self.entity_ttl_secs),
            job: std::time::Duration::from_secs(self.job_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Explicit overrides applied after every other source, highest precedence
/// (spec §7: "explicit overrides" is the last layer).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Layers, lowest to highest precedence: embedded defaults, an optional file
/// at `overrides.config_path`, `COORD__`-prefixed environment variables,
/// then the explicit fields on `overrides` itself.
pub fn load(overrides: ConfigOverrides) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));

    if let Some(path) = &overrides.config_path {
        builder = builder.add_source(File::from(path.as_path()).required(false));
    }

    builder = builder.add_source(Environment::with_prefix("COORD").separator("__"));

    if let Some(host) = overrides.server_host {
        builder = builder.set_override("server.host", host)?;
    }
    if let Some(port) = overrides.server_port {
        builder = builder.set_override("server.port", port as i64)?;
    }
    if let Some(url) = overrides.database_url {
        builder = builder.set_override("database.url", url)?;
    }
    if let Some(log_level) = overrides.log_level {
        builder = builder.set_override("observability.log_level", log_level)?;
    }
    if let Some(log_format) = overrides.log_format {
        builder = builder.set_override("observability.log_format", log_format)?;
    }

    let built = builder.build()?;
    built.try_deserialize().map_err(ConfigError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_embedded_defaults() {
        let config = load(ConfigOverrides::default()).expect("config loads");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.dispatch.liveness_window_secs, 120);
        assert_eq!(config.cache.max_subscriber_buffer, 64);
    }

    #[test]
    fn explicit_overrides_win_over_defaults() {
        let overrides = ConfigOverrides { server_port: Some(9090), log_level: Some("debug".into()), ..Default::default() };
        let config = load(overrides).expect("config loads with overrides");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn dispatch_section_converts_to_chrono_duration() {
        let config = load(ConfigOverrides::default()).unwrap();
        assert_eq!(config.dispatch.liveness_window(), chrono::Duration::seconds(120));
    }
}
