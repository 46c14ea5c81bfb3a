use std::path::PathBuf;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::error::{SimError, SimResult};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: u64,
    pub results_json: Option<PathBuf>,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> SimResult<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| SimError::InvalidConfig(e.to_string())),
            None => {
                warn!("config section not found");
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 10000000,
            results_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ArbiterConfig {
    pub num_banks: usize,
    pub num_upstreams: usize,
    /// Shared between outstanding reads and queued responses of one bank.  Also caps each
    /// upstream's write queue.
    pub buffer_size: usize,
}

impl Config for ArbiterConfig {}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            num_banks: 8,
            num_upstreams: 1,
            buffer_size: 10,
        }
    }
}

impl ArbiterConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.num_banks == 0 || self.num_upstreams == 0 || self.buffer_size == 0 {
            return Err(SimError::InvalidConfig(format!(
                "arbiter needs at least one bank, upstream and buffer slot, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Downstream memory model, one instance per bank.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MemConfig {
    pub base_latency: u64,
    /// Transfer throughput; 0 means the size of a request does not matter.
    pub bytes_per_cycle: u64,
    pub queue_capacity: usize,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            base_latency: 10,
            bytes_per_cycle: 0,
            queue_capacity: 16,
        }
    }
}

impl MemConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.queue_capacity == 0 {
            return Err(SimError::InvalidConfig(
                "mem.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Table;

    #[test]
    fn missing_section_falls_back_to_default() {
        let cfg = ArbiterConfig::from_section(None).unwrap();
        assert_eq!(cfg, ArbiterConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let table: Table = toml::from_str("[arbiter]\nnum_upstreams = 4\n").unwrap();
        let cfg = ArbiterConfig::from_section(table.get("arbiter")).unwrap();
        assert_eq!(cfg.num_upstreams, 4);
        assert_eq!(cfg.num_banks, 8);
        assert_eq!(cfg.buffer_size, 10);
    }

    #[test]
    fn bad_section_is_an_error() {
        let table: Table = toml::from_str("[mem]\nbase_latency = \"soon\"\n").unwrap();
        assert!(matches!(
            MemConfig::from_section(table.get("mem")),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_sized_arbiter_is_rejected() {
        let cfg = ArbiterConfig {
            buffer_size: 0,
            ..ArbiterConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
