//! Per-agent resource and security configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Agent configuration
///
/// Every section is serde-defaulted, so a partial YAML block overrides only
/// what it names. In code, override with struct-update syntax:
///
/// ```ignore
/// let config = AgentConfig {
///     resources: ResourceConfig { memory: 2048, ..Default::default() },
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub resources: ResourceConfig,
    pub security: SecurityConfig,
}

/// Resource budget for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Memory budget in megabytes
    pub memory: u64,

    /// CPU cores
    pub cpu: u32,

    pub network: NetworkConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: 512,
            cpu: 1,
            network: NetworkConfig::default(),
        }
    }
}

/// Network budget for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: u32,

    /// Bandwidth in kilobytes per second
    pub bandwidth: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            bandwidth: 1024,
        }
    }
}

/// Security settings for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub permissions: Vec<String>,

    /// Service name to the environment variable holding its key
    #[serde(rename = "api-keys")]
    pub api_keys: BTreeMap<String, String>,

    pub restrictions: Vec<String>,
}
