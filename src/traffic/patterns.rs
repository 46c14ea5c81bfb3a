use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::base::packet::Addr;
use crate::error::{SimError, SimResult};
use crate::timeq::Tick;
use crate::traffic::config::TrafficConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Write,
}

impl PatternOp {
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "r" | "read" => Some(Self::Read),
            "w" | "write" => Some(Self::Write),
            _ => None,
        }
    }
}

/// One request a source wants to send.  `not_before` is only set for trace replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficRequest {
    pub addr: Addr,
    pub op: PatternOp,
    pub not_before: Option<Tick>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub tick: Tick,
    pub addr: Addr,
    pub op: PatternOp,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Stream { stride: u64 },
    Random { span_bytes: u64 },
    SameAddress,
    Trace { entries: Vec<TraceEntry> },
}

/// Address/op generator of one source.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    kind: PatternKind,
    base_addr: Addr,
    req_bytes: u64,
    read_ratio: f64,
    total: u64,
    generated: u64,
    rng: StdRng,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig, source_idx: usize) -> SimResult<Self> {
        let spec = &config.pattern;
        let req_bytes = config.req_bytes.max(1) as u64;
        let kind = match spec.kind.trim().to_ascii_lowercase().as_str() {
            "stream" | "streaming" => PatternKind::Stream {
                stride: spec.stride.max(1),
            },
            "random" => PatternKind::Random {
                span_bytes: spec.span_bytes.max(req_bytes),
            },
            "same_address" => PatternKind::SameAddress,
            "trace" => {
                let path = spec.trace_file.as_ref().ok_or_else(|| {
                    SimError::InvalidConfig("trace pattern needs traffic.pattern.trace_file".to_string())
                })?;
                PatternKind::Trace {
                    entries: load_trace(path)?,
                }
            }
            other => {
                return Err(SimError::InvalidConfig(format!(
                    "unsupported traffic pattern kind '{}' (expected stream|random|same_address|trace)",
                    other
                )))
            }
        };
        Ok(Self::with_kind(config, source_idx, kind))
    }

    /// Replay an already parsed trace.
    pub fn from_trace(config: &TrafficConfig, source_idx: usize, entries: Vec<TraceEntry>) -> Self {
        Self::with_kind(config, source_idx, PatternKind::Trace { entries })
    }

    fn with_kind(config: &TrafficConfig, source_idx: usize, kind: PatternKind) -> Self {
        let total = match &kind {
            PatternKind::Trace { entries } => entries.len() as u64,
            _ => config.num_requests,
        };
        Self {
            kind,
            base_addr: config
                .base_addr
                .wrapping_add(config.source_stride.wrapping_mul(source_idx as u64)),
            req_bytes: config.req_bytes.max(1) as u64,
            read_ratio: config.pattern.read_ratio,
            total,
            generated: 0,
            rng: StdRng::seed_from_u64(config.pattern.seed.wrapping_add(source_idx as u64)),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.generated >= self.total
    }

    fn next_op(&mut self) -> PatternOp {
        if self.rng.gen_bool(self.read_ratio) {
            PatternOp::Read
        } else {
            PatternOp::Write
        }
    }
}

impl Iterator for PatternEngine {
    type Item = TrafficRequest;

    fn next(&mut self) -> Option<TrafficRequest> {
        if self.is_exhausted() {
            return None;
        }
        let idx = self.generated;
        self.generated += 1;
        let (addr, op, not_before) = match &self.kind {
            PatternKind::Stream { stride } => {
                (self.base_addr.wrapping_add(idx.wrapping_mul(*stride)), None, None)
            }
            PatternKind::Random { span_bytes } => {
                let slots = (*span_bytes / self.req_bytes).max(1);
                let slot = self.rng.gen_range(0..slots);
                (self.base_addr.wrapping_add(slot * self.req_bytes), None, None)
            }
            PatternKind::SameAddress => (self.base_addr, None, None),
            PatternKind::Trace { entries } => {
                let entry = &entries[idx as usize];
                (entry.addr, Some(entry.op), Some(entry.tick))
            }
        };
        let op = match op {
            Some(op) => op,
            None => self.next_op(),
        };
        let request = TrafficRequest {
            addr,
            op,
            not_before,
        };
        Some(request)
    }
}

fn parse_number(token: &str) -> Option<u64> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

/// Parse `<tick> <addr> <R|W>` lines.  Blank lines and `#` comments are skipped.
pub fn parse_trace(text: &str) -> SimResult<Vec<TraceEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let bad = || SimError::InvalidConfig(format!("trace line {}: cannot parse '{}'", lineno + 1, line));
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [tick, addr, op] = fields.as_slice() else {
            return Err(bad());
        };
        let entry = TraceEntry {
            tick: parse_number(tick).ok_or_else(bad)?,
            addr: parse_number(addr).ok_or_else(bad)?,
            op: PatternOp::parse(op).ok_or_else(bad)?,
        };
        if entries.last().is_some_and(|prev: &TraceEntry| prev.tick > entry.tick) {
            return Err(SimError::InvalidConfig(format!(
                "trace line {}: tick {} goes backwards",
                lineno + 1,
                entry.tick
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

pub fn load_trace(path: &Path) -> SimResult<Vec<TraceEntry>> {
    let text = fs::read_to_string(path).map_err(|e| {
        SimError::InvalidConfig(format!("cannot read trace {}: {}", path.display(), e))
    })?;
    parse_trace(&text)
}
