use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MasterConfig {
    pub master: NodeConfig,
    pub registry: RegistryConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Address the master advertises to the cluster
    #[serde(default = "default_master_host")]
    pub host: String,

    /// Port the master advertises to the cluster
    #[serde(default = "default_master_port")]
    pub port: u16,

    /// Stable node identifier; generated at startup when absent
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    /// Registry endpoint (host:port)
    #[serde(default = "default_registry_endpoint")]
    pub endpoint: String,

    /// Interval between session heartbeats in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long a suspended session may last before it is declared lost
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Timeout for a single heartbeat attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight workflow instances to finish
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Upper bound for every other shutdown step
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl RegistryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl MasterConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("flowmaster.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("master.host", default_master_host())?
            .set_default("master.port", default_master_port())?
            .set_default("registry.endpoint", default_registry_endpoint())?
            .set_default(
                "registry.heartbeat_interval_ms",
                default_heartbeat_interval_ms(),
            )?
            .set_default("registry.session_timeout_ms", default_session_timeout_ms())?
            .set_default("registry.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("shutdown.drain_timeout_secs", default_drain_timeout_secs())?
            .set_default("shutdown.step_timeout_secs", default_step_timeout_secs())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // FLOWMASTER_REGISTRY__ENDPOINT, FLOWMASTER_SHUTDOWN__DRAIN_TIMEOUT_SECS, ...
            .add_source(
                Environment::with_prefix("FLOWMASTER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: MasterConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.endpoint.trim().is_empty() {
            return Err(ConfigError::Message(
                "Registry endpoint must not be empty".to_string(),
            ));
        }

        if self.registry.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Registry heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.registry.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Registry connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.registry.session_timeout_ms <= self.registry.heartbeat_interval_ms {
            return Err(ConfigError::Message(
                "Registry session_timeout_ms must be greater than heartbeat_interval_ms"
                    .to_string(),
            ));
        }

        if self.shutdown.drain_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Shutdown drain_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.shutdown.step_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Shutdown step_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            master: NodeConfig {
                host: default_master_host(),
                port: default_master_port(),
                node_id: None,
            },
            registry: RegistryConfig {
                endpoint: default_registry_endpoint(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                session_timeout_ms: default_session_timeout_ms(),
                connect_timeout_ms: default_connect_timeout_ms(),
            },
            shutdown: ShutdownConfig {
                drain_timeout_secs: default_drain_timeout_secs(),
                step_timeout_secs: default_step_timeout_secs(),
            },
        }
    }
}

// Default value functions
fn default_master_host() -> String {
    "0.0.0.0".to_string()
}
fn default_master_port() -> u16 {
    5678
}

fn default_registry_endpoint() -> String {
    "127.0.0.1:2181".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    1000
}
fn default_session_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_drain_timeout_secs() -> u64 {
    30
}
fn default_step_timeout_secs() -> u64 {
    10
}
