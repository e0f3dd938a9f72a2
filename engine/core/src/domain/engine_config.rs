// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) holding the
// runtime knobs of the engine:
// - ledger publish timeout, retries and the issuer topic
// - store retries
// - runtime state TTL and event bus sizing
// - log level for hosts that initialize tracing from config

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "guardian/v1";
pub const CONFIG_KIND: &str = "EngineConfig";

/// Top-level engine configuration manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: EngineConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigSpec {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// How long a single publish may wait for acknowledgement
    #[serde(with = "humantime_serde", default = "default_publish_timeout")]
    pub publish_timeout: Duration,

    /// Extra attempts after a transient publish failure
    #[serde(default = "default_retries")]
    pub publish_retries: u32,

    /// Topic used when a block publishes to the issuer's topic
    #[serde(default = "default_issuer_topic")]
    pub issuer_topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Extra attempts after a retryable store failure
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Idle time after which per-(block, actor) runtime state is discarded
    #[serde(with = "humantime_serde", default = "default_state_ttl")]
    pub state_ttl: Duration,

    /// Buffer of the observer broadcast channel
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Upper bound on events processed by one publish
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    1
}

fn default_issuer_topic() -> String {
    "issuer".to_string()
}

fn default_state_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_event_bus_capacity() -> usize {
    1000
}

fn default_max_hops() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            publish_timeout: default_publish_timeout(),
            publish_retries: default_retries(),
            issuer_topic: default_issuer_topic(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_ttl: default_state_ttl(),
            event_bus_capacity: default_event_bus_capacity(),
            max_hops: default_max_hops(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ConfigMetadata {
                name: "default".to_string(),
                version: None,
            },
            spec: EngineConfigSpec::default(),
        }
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. GUARDIAN_CONFIG_PATH environment variable
    /// 2. ./guardian-config.yaml (working directory)
    /// 3. ~/.guardian/config.yaml (user home)
    /// 4. /etc/guardian/config.yaml (system, Unix) or C:\ProgramData\Guardian\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GUARDIAN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./guardian-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".guardian").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/guardian/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Guardian\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GUARDIAN_PUBLISH_TIMEOUT") {
            match humantime::parse_duration(&val) {
                Ok(timeout) => {
                    tracing::info!("Environment override: GUARDIAN_PUBLISH_TIMEOUT={}", val);
                    self.spec.ledger.publish_timeout = timeout;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for GUARDIAN_PUBLISH_TIMEOUT: '{}' ({}). Ignoring.",
                        val,
                        e
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("GUARDIAN_STATE_TTL") {
            match humantime::parse_duration(&val) {
                Ok(ttl) => {
                    tracing::info!("Environment override: GUARDIAN_STATE_TTL={}", val);
                    self.spec.runtime.state_ttl = ttl;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for GUARDIAN_STATE_TTL: '{}' ({}). Ignoring.", val, e);
                }
            }
        }

        if let Ok(val) = std::env::var("GUARDIAN_ISSUER_TOPIC") {
            if val.is_empty() {
                tracing::warn!("Empty GUARDIAN_ISSUER_TOPIC ignored");
            } else {
                tracing::info!("Environment override: GUARDIAN_ISSUER_TOPIC={}", val);
                self.spec.ledger.issuer_topic = val;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.ledger.publish_timeout.is_zero() {
            anyhow::bail!("spec.ledger.publish_timeout must be greater than zero");
        }

        if self.spec.ledger.issuer_topic.is_empty() {
            anyhow::bail!("spec.ledger.issuer_topic cannot be empty");
        }

        if self.spec.runtime.event_bus_capacity == 0 {
            anyhow::bail!("spec.runtime.event_bus_capacity must be greater than zero");
        }

        if self.spec.runtime.max_hops == 0 {
            anyhow::bail!("spec.runtime.max_hops must be greater than zero");
        }

        Ok(())
    }
}
