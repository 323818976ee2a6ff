//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Session registry configuration.
///
/// Controls how long acquisitions may wait for metadata and where the
/// engine writes downloaded content.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum wait for an engine to report metadata readiness
    pub acquire_timeout: Duration,
    /// Process-local storage root, purged on shutdown
    pub storage_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            storage_dir: PathBuf::from("downloads"),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// TCP port to bind
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

impl ServerConfig {
    /// Returns the `host:port` string for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Simulated engine configuration for development and testing.
///
/// Controls how quickly the in-process engine reports metadata and how fast
/// it pretends to download.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Delay before a new transfer reports metadata readiness
    pub metadata_delay: Duration,
    /// Simulated download speed in bytes per second
    pub download_speed: u64,
    /// Size of chunks yielded by simulated file streams
    pub chunk_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            metadata_delay: Duration::from_millis(250),
            download_speed: 1_048_576, // 1 MiB/s
            chunk_size: 65536,         // 64 KiB
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn instant() -> Self {
        Self {
            metadata_delay: Duration::ZERO,
            download_speed: u64::MAX,
            chunk_size: 16,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }

        if let Some(host) = lookup("UNDERTOW_HOST") {
            config.server.host = host;
        }

        if let Some(dir) = lookup("UNDERTOW_STORAGE_DIR") {
            config.session.storage_dir = PathBuf::from(dir);
        }

        if let Some(timeout) = lookup("UNDERTOW_ACQUIRE_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(seconds) => config.session.acquire_timeout = Duration::from_secs(seconds),
                Err(_) => tracing::warn!("Ignoring invalid UNDERTOW_ACQUIRE_TIMEOUT: {}", timeout),
            }
        }

        if let Some(speed) = lookup("UNDERTOW_SIM_DOWNLOAD_SPEED") {
            match speed.parse::<u64>() {
                Ok(speed) => config.simulation.download_speed = speed,
                Err(_) => tracing::warn!("Ignoring invalid UNDERTOW_SIM_DOWNLOAD_SPEED: {}", speed),
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing(storage_dir: PathBuf) -> Self {
        Self {
            session: SessionConfig {
                acquire_timeout: Duration::from_secs(30),
                storage_dir,
            },
            simulation: SimulationConfig::instant(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.session.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.session.storage_dir, PathBuf::from("downloads"));
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.server.bind_address(), "127.0.0.1:8888");
        assert_eq!(config.simulation.chunk_size, 65536);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("UNDERTOW_HOST", "0.0.0.0"),
            ("UNDERTOW_STORAGE_DIR", "/tmp/undertow"),
            ("UNDERTOW_ACQUIRE_TIMEOUT", "5"),
        ]
        .into_iter()
        .collect();

        let config = UndertowConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.session.storage_dir, PathBuf::from("/tmp/undertow"));
        assert_eq!(config.session.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_overrides_keep_defaults() {
        let config = UndertowConfig::from_lookup(|key| match key {
            "PORT" => Some("not-a-port".to_string()),
            "UNDERTOW_ACQUIRE_TIMEOUT" => Some("-1".to_string()),
            _ => None,
        });

        assert_eq!(config.server.port, 8888);
        assert_eq!(config.session.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_testing_preset() {
        let config = UndertowConfig::for_testing(PathBuf::from("/tmp/x"));
        assert_eq!(config.simulation.metadata_delay, Duration::ZERO);
        assert_eq!(config.session.storage_dir, PathBuf::from("/tmp/x"));
    }
}
