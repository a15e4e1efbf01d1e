// src/config.rs

//! Manages agent configuration: loading from TOML and startup validation.

use crate::core::MusterError;
use crate::core::conciliation::ConciliationStrategy;
use crate::core::deployer::DeploymentStrategy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The ordered host set of the cluster. The local host must be a member.
    pub address_list: Vec<String>,

    /// The name this agent goes by in `address_list`.
    pub local_address: String,

    /// Port of the internal publish/subscribe bus.
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Port on which status events are re-published for external consumers.
    #[serde(default = "default_event_port")]
    pub event_port: u16,

    /// Port of the per-host process-manager RPC.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Upper bound on how long INITIALIZATION waits for every peer.
    #[serde(with = "humantime_serde", default = "default_synchro_timeout")]
    pub synchro_timeout: Duration,

    /// How long a host may stay quiet before it is marked SILENT.
    #[serde(with = "humantime_serde", default = "default_silence_timeout")]
    pub silence_timeout: Duration,

    /// Period of the local heartbeat and of the supervision cycle.
    #[serde(with = "humantime_serde", default = "default_tick_period")]
    pub tick_period: Duration,

    /// Whether SILENT hosts are quarantined on the next tick.
    #[serde(default)]
    pub auto_fence: bool,

    #[serde(default)]
    pub conciliation_strategy: ConciliationStrategy,

    #[serde(default)]
    pub deployment_strategy: DeploymentStrategy,

    /// Path of the application-rules file. Absent means no rules: every
    /// process falls back to the documented defaults.
    #[serde(default)]
    pub deployment_file: Option<PathBuf>,
}

fn default_internal_port() -> u16 {
    65001
}

fn default_event_port() -> u16 {
    65002
}

fn default_rpc_port() -> u16 {
    65000
}

fn default_synchro_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_silence_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_tick_period() -> Duration {
    Duration::from_secs(5)
}

/// Allowed range of the synchronization timeout, in seconds.
const SYNCHRO_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 15..=1200;

impl Config {
    pub async fn from_file(path: &str) -> Result<Self, MusterError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| MusterError::Config(format!("cannot read {path}: {e}")))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Startup validation. Any failure here is fatal.
    pub fn validate(&self) -> Result<(), MusterError> {
        if self.address_list.is_empty() {
            return Err(MusterError::Config("address_list is empty".to_string()));
        }
        let unique: HashSet<&String> = self.address_list.iter().collect();
        if unique.len() != self.address_list.len() {
            return Err(MusterError::Config(
                "address_list contains duplicates".to_string(),
            ));
        }
        if !self.address_list.contains(&self.local_address) {
            return Err(MusterError::Config(format!(
                "local address '{}' is not a member of address_list",
                self.local_address
            )));
        }
        for (name, port) in [
            ("internal_port", self.internal_port),
            ("event_port", self.event_port),
            ("rpc_port", self.rpc_port),
        ] {
            if port == 0 {
                return Err(MusterError::Config(format!("{name} must be nonzero")));
            }
        }
        if self.internal_port == self.event_port {
            return Err(MusterError::Config(
                "internal_port and event_port must differ".to_string(),
            ));
        }
        if !SYNCHRO_TIMEOUT_RANGE.contains(&self.synchro_timeout.as_secs()) {
            return Err(MusterError::Config(format!(
                "synchro_timeout must be within {}..={} seconds",
                SYNCHRO_TIMEOUT_RANGE.start(),
                SYNCHRO_TIMEOUT_RANGE.end()
            )));
        }
        if self.tick_period.as_secs() == 0 {
            return Err(MusterError::Config(
                "tick_period must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}
