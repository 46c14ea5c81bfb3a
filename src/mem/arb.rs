use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::Serialize;

use crate::base::module::{sim_object, ComponentId};
use crate::base::packet::PacketPtr;
use crate::base::port::{PortId, PortKind};
use crate::base::timing::{TimingRequester, TimingResponder};
use crate::error::{SimError, SimResult};
use crate::mem::bank::{BankState, QueueKind};
use crate::sim::config::ArbiterConfig;
use crate::sim::top::Sim;
use crate::timeq::{EventId, Priority};

/// Role of one arbiter port.  Upstreams bind to `Response` ports, the memory of a bank binds to
/// its `Request` port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArbPort {
    Response { bank: usize, upstream: usize },
    Request { bank: usize },
}

impl fmt::Display for ArbPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response { bank, upstream } => write!(f, "response{}_{}", bank, upstream),
            Self::Request { bank } => write!(f, "request{}", bank),
        }
    }
}

impl FromStr for ArbPort {
    type Err = SimError;

    /// `response<bank>[_<upstream>]` or `request<bank>`.  A response name without an upstream
    /// means upstream 0.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || SimError::UnknownPort {
            owner: "arbiter".to_string(),
            name: name.to_string(),
        };
        let number = |s: &str| -> SimResult<usize> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unknown());
            }
            s.parse().map_err(|_| unknown())
        };
        if let Some(rest) = name.strip_prefix("response") {
            let (bank, upstream) = match rest.split_once('_') {
                Some((bank, upstream)) => (number(bank)?, number(upstream)?),
                None => (number(rest)?, 0),
            };
            Ok(Self::Response { bank, upstream })
        } else if let Some(rest) = name.strip_prefix("request") {
            Ok(Self::Request { bank: number(rest)? })
        } else {
            Err(unknown())
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    pub reads_accepted: u64,
    pub writes_accepted: u64,
    pub requests_rejected: u64,
    pub reads_forwarded: u64,
    pub writes_forwarded: u64,
    pub downstream_rejects: u64,
    pub responses_delivered: u64,
    pub response_rejects: u64,
    pub req_retries_sent: u64,
    pub peak_outstanding: usize,
}

/// Multi-bank, multi-upstream front end of a memory controller.  Each bank round-robins its
/// upstreams onto one downstream port and routes read data back to whoever asked for it.
pub struct DramArb {
    name: String,
    id: ComponentId,
    config: ArbiterConfig,
    banks: Vec<BankState>,
    // [bank][upstream]
    up_ports: Vec<Vec<PortId>>,
    down_ports: Vec<PortId>,
    arb_event: EventId,
    send_event: EventId,
    stats: ArbiterStats,
}

impl DramArb {
    pub fn new(
        id: ComponentId,
        sim: &mut Sim,
        name: impl Into<String>,
        config: ArbiterConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        let name = name.into();
        let n = config.num_upstreams;
        let mut banks = Vec::with_capacity(config.num_banks);
        let mut up_ports = Vec::with_capacity(config.num_banks);
        let mut down_ports = Vec::with_capacity(config.num_banks);
        for bank in 0..config.num_banks {
            banks.push(BankState::new(
                format!("{}.bank{}", name, bank),
                bank,
                n,
                config.buffer_size,
            ));
            up_ports.push(
                (0..n)
                    .map(|upstream| {
                        let role = ArbPort::Response { bank, upstream };
                        sim.add_port(id, PortKind::Response, bank * n + upstream, format!("{}.{}", name, role))
                    })
                    .collect(),
            );
            let role = ArbPort::Request { bank };
            down_ports.push(sim.add_port(id, PortKind::Request, bank, format!("{}.{}", name, role)));
        }
        let arb_event = sim.register_event(id, format!("{}.arbitrate", name), Priority::DEFAULT);
        let send_event = sim.register_event(id, format!("{}.send_responses", name), Priority::DEFAULT);
        info!(
            "{}: {} banks x {} upstreams, buffer size {}",
            name, config.num_banks, n, config.buffer_size
        );
        Ok(Self {
            name,
            id,
            config,
            banks,
            up_ports,
            down_ports,
            arb_event,
            send_event,
            stats: ArbiterStats::default(),
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn stats(&self) -> &ArbiterStats {
        &self.stats
    }

    pub fn bank(&self, bank: usize) -> &BankState {
        &self.banks[bank]
    }

    pub fn banks(&self) -> &[BankState] {
        &self.banks
    }

    /// Resolve a typed port role, checking bank and upstream ranges.
    pub fn port(&self, role: ArbPort) -> SimResult<PortId> {
        let found = match role {
            ArbPort::Response { bank, upstream } => {
                self.up_ports.get(bank).and_then(|ports| ports.get(upstream))
            }
            ArbPort::Request { bank } => self.down_ports.get(bank),
        };
        found.copied().ok_or_else(|| SimError::UnknownPort {
            owner: self.name.clone(),
            name: role.to_string(),
        })
    }

    /// Resolve a textual port name such as `response3_1` or `request5`.
    pub fn port_by_name(&self, name: &str) -> SimResult<PortId> {
        let role = name.parse::<ArbPort>().map_err(|_| SimError::UnknownPort {
            owner: self.name.clone(),
            name: name.to_string(),
        })?;
        self.port(role)
    }

    fn split_local(&self, local: usize) -> (usize, usize) {
        (local / self.config.num_upstreams, local % self.config.num_upstreams)
    }

    fn arbitrate(&mut self, sim: &mut Sim) -> SimResult<()> {
        let mut resched = false;
        for (b, bank) in self.banks.iter_mut().enumerate() {
            if !bank.has_pending() {
                continue;
            }
            let down = self.down_ports[b];
            let mut served = bank
                .scan(QueueKind::Read, |pkt| sim.send_timing_req(down, pkt))?
                .map(|up| (QueueKind::Read, up));
            if served.is_none() {
                served = bank
                    .scan(QueueKind::Write, |pkt| sim.send_timing_req(down, pkt))?
                    .map(|up| (QueueKind::Write, up));
            }
            match served {
                Some((QueueKind::Read, up)) => {
                    self.stats.reads_forwarded += 1;
                    debug!("[tick {}] {}: read from upstream {} forwarded", sim.now(), bank.name(), up);
                }
                Some((QueueKind::Write, up)) => {
                    self.stats.writes_forwarded += 1;
                    debug!("[tick {}] {}: write from upstream {} forwarded", sim.now(), bank.name(), up);
                    // a write slot of that upstream just freed up
                    if bank.take_req_retry(up) {
                        sim.send_retry_req(self.up_ports[b][up])?;
                        self.stats.req_retries_sent += 1;
                    }
                }
                None => {
                    self.stats.downstream_rejects += 1;
                    resched = true;
                }
            }
            resched |= bank.has_pending();
        }
        if resched {
            sim.arm(self.arb_event, sim.now() + 1)?;
        }
        Ok(())
    }

    fn send_responses(&mut self, sim: &mut Sim) -> SimResult<()> {
        let mut again = false;
        for (b, bank) in self.banks.iter_mut().enumerate() {
            for _ in 0..self.config.num_upstreams {
                let Some(head) = bank.deliverable() else {
                    break;
                };
                let dest = head.upstream;
                let pkt = head.packet.clone();
                if sim.send_timing_resp(self.up_ports[b][dest], &pkt)? {
                    bank.pop_response();
                    self.stats.responses_delivered += 1;
                    debug!("[tick {}] {}: {} delivered to upstream {}", sim.now(), bank.name(), pkt, dest);
                    for up in bank.take_req_retries(dest) {
                        sim.send_retry_req(self.up_ports[b][up])?;
                        self.stats.req_retries_sent += 1;
                    }
                } else {
                    bank.mark_resp_retry(dest);
                    self.stats.response_rejects += 1;
                    debug!("[tick {}] {}: upstream {} refused {}", sim.now(), bank.name(), dest, pkt);
                    break;
                }
            }
            again |= bank.deliverable().is_some();
        }
        if again {
            sim.arm(self.send_event, sim.now() + 1)?;
        }
        Ok(())
    }
}

impl TimingResponder for DramArb {
    fn recv_timing_req(&mut self, sim: &mut Sim, port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        let (b, up) = self.split_local(port);
        let bank = &mut self.banks[b];
        if !bank.admit(up, pkt)? {
            self.stats.requests_rejected += 1;
            debug!("[tick {}] {}: rejected {} from upstream {}", sim.now(), bank.name(), pkt, up);
            return Ok(false);
        }
        if pkt.is_write() {
            self.stats.writes_accepted += 1;
        } else {
            self.stats.reads_accepted += 1;
            self.stats.peak_outstanding = self.stats.peak_outstanding.max(bank.outstanding());
        }
        debug!("[tick {}] {}: accepted {} from upstream {}", sim.now(), bank.name(), pkt, up);
        sim.arm(self.arb_event, sim.now() + 1)?;
        Ok(true)
    }

    fn try_timing(&self, _sim: &Sim, port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        let (b, up) = self.split_local(port);
        Ok(self.banks[b].can_accept(up, pkt))
    }

    fn recv_resp_retry(&mut self, sim: &mut Sim, port: usize) -> SimResult<()> {
        let (b, up) = self.split_local(port);
        if self.banks[b].clear_resp_retry(up) {
            self.send_responses(sim)?;
        }
        Ok(())
    }
}

impl TimingRequester for DramArb {
    fn recv_timing_resp(&mut self, sim: &mut Sim, port: usize, pkt: &PacketPtr) -> SimResult<bool> {
        let bank = &mut self.banks[port];
        let waiter = bank.complete_read(pkt)?;
        debug!(
            "[tick {}] {}: data for {} queued to upstream {}",
            sim.now(),
            bank.name(),
            waiter.packet,
            waiter.upstream
        );
        sim.arm(self.send_event, sim.now() + 1)?;
        Ok(true)
    }

    fn recv_req_retry(&mut self, sim: &mut Sim, _port: usize) -> SimResult<()> {
        sim.arm(self.arb_event, sim.now() + 1)?;
        Ok(())
    }
}

sim_object!(DramArb,
    fn init(&mut self, sim: &mut Sim) -> SimResult<()> {
        let unbound = self
            .up_ports
            .iter()
            .flatten()
            .chain(self.down_ports.iter())
            .filter(|&&port| !sim.topology().is_bound(port))
            .count();
        if unbound > 0 {
            warn!("{}: {} ports left unbound", self.name, unbound);
        }
        Ok(())
    }

    fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()> {
        if event == self.arb_event {
            self.arbitrate(sim)
        } else if event == self.send_event {
            self.send_responses(sim)
        } else {
            Err(SimError::UnknownEvent(event.index()))
        }
    }
);
