use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{SimError, SimResult};
use crate::sim::config::Config;
use crate::timeq::Tick;

/// Settings shared by every traffic source.  Source `i` offsets the random seed by `i` and its
/// base address by `i * source_stride` so upstreams do not replay the same stream.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub num_requests: u64,
    pub req_bytes: usize,
    pub base_addr: u64,
    /// Source `i` starts at `base_addr + i * source_stride`.
    pub source_stride: u64,
    // consecutive blocks of this many bytes map to consecutive banks
    pub interleave_bytes: u64,
    pub issue_interval: Tick,
    pub max_inflight: usize,
    pub response_buffer: usize,
    pub drain_per_cycle: usize,
    pub pattern: TrafficPatternSpec,
    pub logging: TrafficLoggingConfig,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_requests: 1000,
            req_bytes: 64,
            base_addr: 0,
            source_stride: 16384,
            interleave_bytes: 64,
            issue_interval: 1,
            max_inflight: 16,
            response_buffer: 8,
            drain_per_cycle: 1,
            pattern: TrafficPatternSpec::default(),
            logging: TrafficLoggingConfig::default(),
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> SimResult<()> {
        let positive = [
            ("req_bytes", self.req_bytes as u64),
            ("interleave_bytes", self.interleave_bytes),
            ("max_inflight", self.max_inflight as u64),
            ("response_buffer", self.response_buffer as u64),
            ("drain_per_cycle", self.drain_per_cycle as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SimError::InvalidConfig(format!(
                "traffic.{} must be at least 1",
                field
            )));
        }
        if !(0.0..=1.0).contains(&self.pattern.read_ratio) {
            return Err(SimError::InvalidConfig(format!(
                "traffic.pattern.read_ratio {} is outside [0, 1]",
                self.pattern.read_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    /// stream | random | same_address | trace
    pub kind: String,
    pub read_ratio: f64,
    pub stride: u64,
    pub span_bytes: u64,
    pub seed: u64,
    pub trace_file: Option<PathBuf>,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            kind: "stream".to_string(),
            read_ratio: 1.0,
            stride: 64,
            span_bytes: 1 << 20,
            seed: 0,
            trace_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficLoggingConfig {
    pub print_traffic_lines: bool,
}

impl Default for TrafficLoggingConfig {
    fn default() -> Self {
        Self {
            print_traffic_lines: true,
        }
    }
}
