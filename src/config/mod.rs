/// Configuration management for enlace
use crate::cluster::FailoverPolicy;
use crate::core::SessionSettings;
use crate::error::ConfigError;
use crate::stream::DispatchConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Cluster bootstrap configuration
    pub cluster: ClusterConfig,
    /// Retry budgets of the failover layer
    pub failover: FailoverConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// Transaction stream configuration
    pub transport: TransportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cluster bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Addresses asked for the member list, in order
    pub addresses: Vec<String>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Attempts of a primary-routed operation before giving up
    pub primary_max_retries: usize,
    /// Topology refreshes while looking for a primary
    pub fetch_replicas_max_retries: usize,
    /// Wait between attempts while a primary is elected, in milliseconds
    pub primary_selection_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session pulse interval in milliseconds
    pub pulse_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Batch window for batched requests in milliseconds
    pub batch_window_ms: u64,
    /// Number of pending requests that forces a flush
    pub max_batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                addresses: vec!["127.0.0.1:1729".to_string()],
                connect_timeout_ms: 10_000,
            },
            failover: FailoverConfig {
                primary_max_retries: 10,
                fetch_replicas_max_retries: 10,
                primary_selection_wait_ms: 2000,
            },
            session: SessionConfig {
                pulse_interval_ms: 5000,
            },
            transport: TransportConfig {
                batch_window_ms: 3,
                max_batch_size: 64,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl DriverConfig {
    /// Default configuration bootstrapping from `addresses`
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self::default();
        config.cluster.addresses = addresses.into_iter().map(Into::into).collect();
        config
    }

    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: DriverConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.addresses.is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster addresses cannot be empty".to_string(),
            ));
        }

        if let Some(address) = self.cluster.addresses.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid cluster address: '{}'",
                address
            )));
        }

        if self.cluster.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.failover.primary_max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "primary_max_retries must be greater than 0".to_string(),
            ));
        }

        if self.failover.fetch_replicas_max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "fetch_replicas_max_retries must be greater than 0".to_string(),
            ));
        }

        if self.session.pulse_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pulse_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.transport.batch_window_ms == 0 || self.transport.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch_window_ms and max_batch_size must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.connect_timeout_ms)
    }

    pub fn failover_policy(&self) -> FailoverPolicy {
        FailoverPolicy {
            primary_max_retries: self.failover.primary_max_retries,
            fetch_replicas_max_retries: self.failover.fetch_replicas_max_retries,
            primary_selection_wait: Duration::from_millis(self.failover.primary_selection_wait_ms),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_window: Duration::from_millis(self.transport.batch_window_ms),
            max_batch_size: self.transport.max_batch_size,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pulse_interval: Duration::from_millis(self.session.pulse_interval_ms),
            dispatch: self.dispatch_config(),
        }
    }

    /// Create example configuration file for a three-member cluster
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = DriverConfig::with_addresses(["10.0.1.10:1729", "10.0.1.11:1729", "10.0.1.12:1729"]);
        config.save_to_file(path)
    }
}
