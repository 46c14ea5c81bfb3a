use std::collections::{HashMap, VecDeque};

use log::debug;
use serde::Serialize;

use crate::base::module::{sim_object, ComponentId};
use crate::base::packet::{Packet, PacketPtr};
use crate::base::port::{PortId, PortKind};
use crate::base::timing::{TimingRequester, TimingResponder};
use crate::error::{SimError, SimResult};
use crate::sim::top::Sim;
use crate::timeq::{EventId, Priority, Tick};
use crate::traffic::config::TrafficConfig;
use crate::traffic::logging::TrafficLogger;
use crate::traffic::patterns::{PatternEngine, PatternOp, TrafficRequest};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TrafficStats {
    pub issued_reads: u64,
    pub issued_writes: u64,
    pub completed_reads: u64,
    pub rejected: u64,
    pub responses_refused: u64,
    pub latency_sum: u64,
    pub latency_min: Option<Tick>,
    pub latency_max: Tick,
    pub done_at: Option<Tick>,
}

impl TrafficStats {
    pub fn avg_latency(&self) -> f64 {
        if self.completed_reads == 0 {
            0.0
        } else {
            self.latency_sum as f64 / self.completed_reads as f64
        }
    }

    fn record_latency(&mut self, latency: Tick) {
        self.completed_reads += 1;
        self.latency_sum += latency;
        self.latency_min = Some(self.latency_min.map_or(latency, |m| m.min(latency)));
        self.latency_max = self.latency_max.max(latency);
    }
}

// next packet in program order, kept across rejections
#[derive(Debug)]
struct Staged {
    bank: usize,
    pkt: PacketPtr,
    not_before: Tick,
}

/// Upstream traffic generator.  Owns one `buf_side<bank>` request port per bank and sends in
/// program order: a refused packet blocks everything behind it until the request-retry.
pub struct TrafficSource {
    name: String,
    config: TrafficConfig,
    ports: Vec<PortId>,
    engine: PatternEngine,
    staged: Option<Staged>,
    waiting_retry: bool,
    // issue is parked until a read completes
    inflight_full: bool,
    inflight: HashMap<u64, Tick>,
    responses: VecDeque<(usize, PacketPtr)>,
    resp_retry_owed: Vec<bool>,
    issue_event: EventId,
    drain_event: EventId,
    stats: TrafficStats,
}

impl TrafficSource {
    pub fn new(
        id: ComponentId,
        sim: &mut Sim,
        name: impl Into<String>,
        source_idx: usize,
        num_banks: usize,
        config: TrafficConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        let engine = PatternEngine::new(&config, source_idx)?;
        Ok(Self::with_engine(id, sim, name, num_banks, config, engine))
    }

    pub fn with_engine(
        id: ComponentId,
        sim: &mut Sim,
        name: impl Into<String>,
        num_banks: usize,
        config: TrafficConfig,
        engine: PatternEngine,
    ) -> Self {
        let name = name.into();
        let ports = (0..num_banks)
            .map(|bank| sim.add_port(id, PortKind::Request, bank, format!("{}.buf_side{}", name, bank)))
            .collect();
        let issue_event = sim.register_event(id, format!("{}.issue", name), Priority::DEFAULT);
        let drain_event = sim.register_event(id, format!("{}.drain", name), Priority::DEFAULT);
        Self {
            name,
            config,
            ports,
            engine,
            staged: None,
            waiting_retry: false,
            inflight_full: false,
            inflight: HashMap::new(),
            responses: VecDeque::new(),
            resp_retry_owed: vec![false; num_banks],
            issue_event,
            drain_event,
            stats: TrafficStats::default(),
        }
    }

    pub fn port(&self, bank: usize) -> SimResult<PortId> {
        self.ports.get(bank).copied().ok_or_else(|| SimError::UnknownPort {
            owner: self.name.clone(),
            name: format!("buf_side{}", bank),
        })
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        self.stats.done_at.is_some()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn bank_of(&self, addr: u64) -> usize {
        ((addr / self.config.interleave_bytes) % self.ports.len() as u64) as usize
    }

    fn build(&self, request: TrafficRequest) -> Staged {
        let pkt = match request.op {
            PatternOp::Read => Packet::read(request.addr, self.config.req_bytes),
            PatternOp::Write => {
                let words = self.config.req_bytes.div_ceil(4);
                Packet::write(request.addr, vec![request.addr as u32; words])
            }
        };
        Staged {
            bank: self.bank_of(request.addr),
            pkt,
            not_before: request.not_before.unwrap_or(0),
        }
    }

    fn issue(&mut self, sim: &mut Sim) -> SimResult<()> {
        if self.waiting_retry {
            return Ok(());
        }
        if self.staged.is_none() {
            self.staged = self.engine.next().map(|r| self.build(r));
        }
        let Some(staged) = &self.staged else {
            return self.check_done(sim);
        };
        if staged.not_before > sim.now() {
            sim.arm(self.issue_event, staged.not_before)?;
            return Ok(());
        }
        if staged.pkt.is_read() && self.inflight.len() >= self.config.max_inflight {
            self.inflight_full = true;
            return Ok(());
        }
        if !sim.send_timing_req(self.ports[staged.bank], &staged.pkt)? {
            self.stats.rejected += 1;
            self.waiting_retry = true;
            debug!("[tick {}] {}: {} refused, waiting for retry", sim.now(), self.name, staged.pkt);
            return Ok(());
        }
        if staged.pkt.is_read() {
            self.inflight.insert(staged.pkt.id(), sim.now());
            self.stats.issued_reads += 1;
        } else {
            self.stats.issued_writes += 1;
        }
        debug!("[tick {}] {}: sent {} to bank {}", sim.now(), self.name, staged.pkt, staged.bank);
        self.staged = None;
        if self.engine.is_exhausted() {
            self.check_done(sim)
        } else {
            sim.arm(self.issue_event, sim.now() + self.config.issue_interval)?;
            Ok(())
        }
    }

    fn drain(&mut self, sim: &mut Sim) -> SimResult<()> {
        let now = sim.now();
        for _ in 0..self.config.drain_per_cycle {
            let Some((bank, pkt)) = self.responses.pop_front() else {
                break;
            };
            let issued = self.inflight.remove(&pkt.id()).ok_or_else(|| {
                SimError::UnexpectedResponse {
                    owner: self.name.clone(),
                    bank,
                    addr: pkt.addr(),
                }
            })?;
            self.stats.record_latency(now - issued);
            if self.config.logging.print_traffic_lines {
                TrafficLogger::log_response(&self.name, now, &pkt, now - issued);
            }
        }
        for bank in 0..self.resp_retry_owed.len() {
            if self.responses.len() >= self.config.response_buffer {
                break;
            }
            if std::mem::replace(&mut self.resp_retry_owed[bank], false) {
                sim.send_retry_resp(self.ports[bank])?;
            }
        }
        if self.inflight_full && self.inflight.len() < self.config.max_inflight {
            self.inflight_full = false;
            sim.arm(self.issue_event, now)?;
        }
        if !self.responses.is_empty() {
            sim.arm(self.drain_event, now + 1)?;
        }
        self.check_done(sim)
    }

    fn check_done(&mut self, sim: &mut Sim) -> SimResult<()> {
        let finished = self.engine.is_exhausted()
            && self.staged.is_none()
            && self.inflight.is_empty()
            && self.responses.is_empty();
        if finished && self.stats.done_at.is_none() {
            self.stats.done_at = Some(sim.now());
            if self.config.logging.print_traffic_lines {
                TrafficLogger::log_source_done(&self.name, sim.now(), &self.stats);
            }
        }
        Ok(())
    }
}

impl TimingRequester for TrafficSource {
    fn recv_timing_resp(&mut self, sim: &mut Sim, port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        if self.responses.len() >= self.config.response_buffer {
            self.resp_retry_owed[port] = true;
            self.stats.responses_refused += 1;
            return Ok(false);
        }
        self.responses.push_back((port, pkt.clone()));
        sim.arm(self.drain_event, sim.now() + 1)?;
        Ok(true)
    }

    fn recv_req_retry(&mut self, sim: &mut Sim, _port: usize) -> SimResult<()> {
        if self.waiting_retry {
            self.waiting_retry = false;
            sim.arm(self.issue_event, sim.now())?;
        }
        Ok(())
    }
}

impl TimingResponder for TrafficSource {}

sim_object!(TrafficSource,
    fn init(&mut self, sim: &mut Sim) -> SimResult<()> {
        sim.arm(self.issue_event, sim.now())?;
        Ok(())
    }

    fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()> {
        if event == self.issue_event {
            self.issue(sim)
        } else if event == self.drain_event {
            self.drain(sim)
        } else {
            Err(SimError::UnknownEvent(event.index()))
        }
    }
);
