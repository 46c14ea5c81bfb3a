use std::collections::VecDeque;

use crate::base::module::{sim_object, ComponentId};
use crate::base::packet::PacketPtr;
use crate::base::port::{PortId, PortKind};
use crate::base::timing::{TimingRequester, TimingResponder};
use crate::error::{SimError, SimResult};
use crate::mem::arb::{ArbPort, DramArb};
use crate::sim::config::ArbiterConfig;
use crate::sim::top::Sim;
use crate::timeq::{EventId, Priority, Tick};

/// Upstream that sends its queued packets back to back until one is refused, then waits for the
/// request-retry.  It can be told to refuse some responses and follow up with a response-retry.
pub struct ScriptedUpstream {
    name: String,
    pub port: PortId,
    pending: VecDeque<PacketPtr>,
    waiting_retry: bool,
    pub refuse_responses: usize,
    pub retry_delay: Tick,
    pub sent: Vec<(Tick, PacketPtr)>,
    // payload is copied on arrival; memory may reuse the packet afterwards
    pub received: Vec<(Tick, PacketPtr, Vec<u32>)>,
    pub rejects: usize,
    pub req_retries: usize,
    issue_event: EventId,
    retry_event: EventId,
}

impl ScriptedUpstream {
    pub fn new(id: ComponentId, sim: &mut Sim, name: String) -> SimResult<Self> {
        Ok(Self {
            port: sim.add_port(id, PortKind::Request, 0, format!("{}.mem_side", name)),
            issue_event: sim.register_event(id, format!("{}.issue", name), Priority::DEFAULT),
            retry_event: sim.register_event(id, format!("{}.retry", name), Priority::DEFAULT),
            name,
            pending: VecDeque::new(),
            waiting_retry: false,
            refuse_responses: 0,
            retry_delay: 1,
            sent: Vec::new(),
            received: Vec::new(),
            rejects: 0,
            req_retries: 0,
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue packets; the caller arms the returned issue event.
    pub fn queue(&mut self, pkts: Vec<PacketPtr>) -> EventId {
        self.pending.extend(pkts);
        self.issue_event
    }

    fn issue(&mut self, sim: &mut Sim) -> SimResult<()> {
        while !self.waiting_retry {
            let Some(head) = self.pending.front() else {
                break;
            };
            if sim.send_timing_req(self.port, head)? {
                let pkt = head.clone();
                self.pending.pop_front();
                self.sent.push((sim.now(), pkt));
            } else {
                self.rejects += 1;
                self.waiting_retry = true;
            }
        }
        Ok(())
    }
}

impl TimingRequester for ScriptedUpstream {
    fn recv_timing_resp(&mut self, sim: &mut Sim, _port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        if self.refuse_responses > 0 {
            self.refuse_responses -= 1;
            sim.arm(self.retry_event, sim.now() + self.retry_delay)?;
            return Ok(false);
        }
        self.received.push((sim.now(), pkt.clone(), pkt.data()));
        Ok(true)
    }

    fn recv_req_retry(&mut self, sim: &mut Sim, _port: usize) -> SimResult<()> {
        self.req_retries += 1;
        self.waiting_retry = false;
        if !self.pending.is_empty() {
            sim.arm(self.issue_event, sim.now())?;
        }
        Ok(())
    }
}

impl TimingResponder for ScriptedUpstream {}

sim_object!(ScriptedUpstream,
    fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()> {
        if event == self.issue_event {
            self.issue(sim)
        } else if event == self.retry_event {
            sim.send_retry_resp(self.port)
        } else {
            Err(SimError::UnknownEvent(event.index()))
        }
    }
);

/// Downstream with a fixed latency and a cap on in-flight reads.  Read responses carry the
/// sequence number of the response as their payload.  Writes retire on arrival.
pub struct ScriptedMemory {
    name: String,
    pub port: PortId,
    pub latency: Tick,
    pub capacity: usize,
    pub paused: bool,
    inflight: VecDeque<(Tick, PacketPtr)>,
    retry_owed: bool,
    resp_blocked: bool,
    pub log: Vec<(Tick, PacketPtr)>,
    pub rejected: usize,
    pub responses_sent: usize,
    event: EventId,
}

impl ScriptedMemory {
    pub fn new(id: ComponentId, sim: &mut Sim, name: String, latency: Tick) -> SimResult<Self> {
        Ok(Self {
            port: sim.add_port(id, PortKind::Response, 0, format!("{}.mem_side", name)),
            event: sim.register_event(id, format!("{}.respond", name), Priority::DEFAULT),
            name,
            latency,
            capacity: usize::MAX,
            paused: false,
            inflight: VecDeque::new(),
            retry_owed: false,
            resp_blocked: false,
            log: Vec::new(),
            rejected: 0,
            responses_sent: 0,
        })
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn arm_next(&mut self, sim: &mut Sim) -> SimResult<()> {
        if self.paused || self.resp_blocked {
            return Ok(());
        }
        if let Some((ready, _)) = self.inflight.front() {
            sim.arm(self.event, (*ready).max(sim.now()))?;
        }
        Ok(())
    }

    fn respond(&mut self, sim: &mut Sim) -> SimResult<()> {
        if self.paused {
            return Ok(());
        }
        let mut freed = false;
        while let Some((ready, pkt)) = self.inflight.front() {
            if *ready > sim.now() {
                break;
            }
            let pkt = pkt.clone();
            pkt.set_data(vec![self.responses_sent as u32]);
            if !sim.send_timing_resp(self.port, &pkt)? {
                self.resp_blocked = true;
                break;
            }
            self.responses_sent += 1;
            self.inflight.pop_front();
            freed = true;
        }
        if freed && self.retry_owed {
            self.retry_owed = false;
            sim.send_retry_req(self.port)?;
        }
        self.arm_next(sim)
    }
}

impl TimingResponder for ScriptedMemory {
    fn recv_timing_req(&mut self, sim: &mut Sim, _port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        if pkt.is_read() && self.inflight.len() >= self.capacity {
            self.retry_owed = true;
            self.rejected += 1;
            return Ok(false);
        }
        self.log.push((sim.now(), pkt.clone()));
        if pkt.is_read() {
            self.inflight.push_back((sim.now() + self.latency, pkt.clone()));
            self.arm_next(sim)?;
        }
        Ok(true)
    }

    fn try_timing(&self, _sim: &Sim, _port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        Ok(pkt.is_write() || self.inflight.len() < self.capacity)
    }

    fn recv_resp_retry(&mut self, sim: &mut Sim, _port: usize) -> SimResult<()> {
        self.resp_blocked = false;
        self.arm_next(sim)
    }
}

impl TimingRequester for ScriptedMemory {}

sim_object!(ScriptedMemory,
    fn process(&mut self, sim: &mut Sim, _event: EventId) -> SimResult<()> {
        self.respond(sim)
    }
);

/// One arbiter, one scripted memory per bank and one scripted upstream per (bank, upstream).
pub struct Rig {
    pub sim: Sim,
    pub arb: ComponentId,
    pub mems: Vec<ComponentId>,
    pub ups: Vec<Vec<ComponentId>>,
}

impl Rig {
    pub fn new(num_banks: usize, num_upstreams: usize, buffer_size: usize, latency: Tick) -> Self {
        Self::build(num_banks, num_upstreams, buffer_size, latency, true).unwrap()
    }

    /// Like `new` but leaves the arbiter's downstream ports unbound.
    pub fn without_memory(num_banks: usize, num_upstreams: usize, buffer_size: usize) -> Self {
        Self::build(num_banks, num_upstreams, buffer_size, 1, false).unwrap()
    }

    fn build(
        num_banks: usize,
        num_upstreams: usize,
        buffer_size: usize,
        latency: Tick,
        with_memory: bool,
    ) -> SimResult<Self> {
        let mut sim = Sim::new("rig");
        let config = ArbiterConfig {
            num_banks,
            num_upstreams,
            buffer_size,
        };
        let arb = sim.add_object(|id, sim| DramArb::new(id, sim, "arb", config))?;
        let mut mems = Vec::new();
        let mut ups = Vec::new();
        for bank in 0..num_banks {
            if with_memory {
                let mem = sim.add_object(|id, sim| {
                    ScriptedMemory::new(id, sim, format!("mem{}", bank), latency)
                })?;
                let mem_port = sim
                    .object::<ScriptedMemory>(mem)
                    .map(|m| m.port)
                    .ok_or(SimError::UnknownComponent(mem))?;
                let down = arb_port(&sim, arb, ArbPort::Request { bank })?;
                sim.bind(down, mem_port)?;
                mems.push(mem);
            }
            let mut row = Vec::new();
            for upstream in 0..num_upstreams {
                let up = sim.add_object(|id, sim| {
                    ScriptedUpstream::new(id, sim, format!("up{}_{}", bank, upstream))
                })?;
                let up_port = sim
                    .object::<ScriptedUpstream>(up)
                    .map(|u| u.port)
                    .ok_or(SimError::UnknownComponent(up))?;
                let resp = arb_port(&sim, arb, ArbPort::Response { bank, upstream })?;
                sim.bind(up_port, resp)?;
                row.push(up);
            }
            ups.push(row);
        }
        sim.init()?;
        Ok(Self {
            sim,
            arb,
            mems,
            ups,
        })
    }

    pub fn arb(&self) -> &DramArb {
        self.sim.object::<DramArb>(self.arb).unwrap()
    }

    pub fn up(&self, bank: usize, upstream: usize) -> &ScriptedUpstream {
        self.sim.object::<ScriptedUpstream>(self.ups[bank][upstream]).unwrap()
    }

    pub fn up_mut(&mut self, bank: usize, upstream: usize) -> &mut ScriptedUpstream {
        self.sim.object_mut::<ScriptedUpstream>(self.ups[bank][upstream]).unwrap()
    }

    pub fn mem(&self, bank: usize) -> &ScriptedMemory {
        self.sim.object::<ScriptedMemory>(self.mems[bank]).unwrap()
    }

    pub fn mem_mut(&mut self, bank: usize) -> &mut ScriptedMemory {
        self.sim.object_mut::<ScriptedMemory>(self.mems[bank]).unwrap()
    }

    /// Queue packets on an upstream; they go out at the current tick.
    pub fn offer(&mut self, bank: usize, upstream: usize, pkts: Vec<PacketPtr>) {
        let event = self.up_mut(bank, upstream).queue(pkts);
        let now = self.sim.now();
        self.sim.arm(event, now).unwrap();
    }

    pub fn pause(&mut self, bank: usize) {
        self.mem_mut(bank).paused = true;
    }

    pub fn resume(&mut self, bank: usize) {
        let mem = self.mems[bank];
        let memory = self.sim.object_mut::<ScriptedMemory>(mem).unwrap();
        memory.paused = false;
        let ready = memory.inflight.front().map(|(ready, _)| *ready);
        let event = memory.event;
        if let Some(ready) = ready {
            let when = ready.max(self.sim.now());
            self.sim.arm(event, when).unwrap();
        }
    }

    pub fn run(&mut self, timeout: Tick) -> bool {
        self.sim.run(timeout).unwrap().drained
    }
}

fn arb_port(sim: &Sim, arb: ComponentId, role: ArbPort) -> SimResult<PortId> {
    sim.object::<DramArb>(arb)
        .ok_or(SimError::UnknownComponent(arb))?
        .port(role)
}
