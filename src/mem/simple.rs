use log::debug;
use serde::Serialize;

use crate::base::module::{sim_object, ComponentId};
use crate::base::packet::PacketPtr;
use crate::base::port::{PortId, PortKind};
use crate::base::timing::{TimingRequester, TimingResponder};
use crate::error::{SimError, SimResult};
use crate::mem::server::{Backpressure, TimedServer};
use crate::sim::config::MemConfig;
use crate::sim::top::Sim;
use crate::timeq::{EventId, Priority};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MemStats {
    pub reads: u64,
    pub writes: u64,
    pub rejected: u64,
    pub response_rejects: u64,
    pub peak_queue: usize,
}

/// Latency/throughput model of one memory bank.  Reads come back through `mem_side` once their
/// ticket is ready, writes retire silently.
pub struct SimpleMemory {
    name: String,
    port: PortId,
    server: TimedServer<PacketPtr>,
    respond_event: EventId,
    req_retry_owed: bool,
    resp_retry_owed: bool,
    stats: MemStats,
}

impl SimpleMemory {
    pub fn new(id: ComponentId, sim: &mut Sim, name: impl Into<String>, config: MemConfig) -> SimResult<Self> {
        config.validate()?;
        let name = name.into();
        let port = sim.add_port(id, PortKind::Response, 0, format!("{}.mem_side", name));
        let respond_event = sim.register_event(id, format!("{}.respond", name), Priority::DEFAULT);
        Ok(Self {
            name,
            port,
            server: TimedServer::new(config),
            respond_event,
            req_retry_owed: false,
            resp_retry_owed: false,
            stats: MemStats::default(),
        })
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn stats(&self) -> &MemStats {
        &self.stats
    }

    pub fn queued(&self) -> usize {
        self.server.len()
    }

    fn arm_next(&mut self, sim: &mut Sim) -> SimResult<()> {
        if self.resp_retry_owed {
            return Ok(());
        }
        if let Some(ticket) = self.server.oldest_ticket() {
            let when = ticket.ready_at().max(sim.now());
            sim.arm(self.respond_event, when)?;
        }
        Ok(())
    }

    fn respond(&mut self, sim: &mut Sim) -> SimResult<()> {
        let mut freed = false;
        while let Some((pkt, _)) = self.server.ready(sim.now()) {
            let pkt = pkt.clone();
            if pkt.is_read() && !sim.send_timing_resp(self.port, &pkt)? {
                self.resp_retry_owed = true;
                self.stats.response_rejects += 1;
                debug!("[tick {}] {}: response {} refused", sim.now(), self.name, pkt);
                break;
            }
            self.server.pop_front();
            freed = true;
            debug!("[tick {}] {}: {} done", sim.now(), self.name, pkt);
        }
        if freed && self.req_retry_owed {
            self.req_retry_owed = false;
            sim.send_retry_req(self.port)?;
        }
        self.arm_next(sim)
    }
}

impl TimingResponder for SimpleMemory {
    fn recv_timing_req(&mut self, sim: &mut Sim, _port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        match self.server.try_enqueue(sim.now(), pkt.clone(), pkt.size()) {
            Ok(ticket) => {
                if pkt.is_write() {
                    self.stats.writes += 1;
                } else {
                    self.stats.reads += 1;
                }
                self.stats.peak_queue = self.stats.peak_queue.max(self.server.len());
                debug!(
                    "[tick {}] {}: {} ready at {}",
                    sim.now(),
                    self.name,
                    pkt,
                    ticket.ready_at()
                );
                self.arm_next(sim)?;
                Ok(true)
            }
            Err(Backpressure::QueueFull { capacity, .. }) => {
                self.req_retry_owed = true;
                self.stats.rejected += 1;
                debug!("[tick {}] {}: queue full ({}), rejected {}", sim.now(), self.name, capacity, pkt);
                Ok(false)
            }
        }
    }

    fn try_timing(&self, _sim: &Sim, _port: usize, _pkt: &PacketPtr) -> SimResult<bool> {
        Ok(!self.server.is_full())
    }

    fn recv_resp_retry(&mut self, sim: &mut Sim, _port: usize) -> SimResult<()> {
        self.resp_retry_owed = false;
        self.arm_next(sim)
    }
}

impl TimingRequester for SimpleMemory {}

sim_object!(SimpleMemory,
    fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()> {
        if event != self.respond_event {
            return Err(SimError::UnknownEvent(event.index()));
        }
        self.respond(sim)
    }
);
