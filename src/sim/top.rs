use log::{debug, info};
use serde::Serialize;

use crate::base::module::{ComponentId, SimObject};
use crate::base::packet::PacketPtr;
use crate::base::port::{PortId, PortKind, Topology};
use crate::error::{SimError, SimResult};
use crate::timeq::{EventId, EventQueue, Fired, Priority, Tick};

/// What the simulator does when an event in its queue fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand the event back to the component that registered it.
    Process { owner: ComponentId },
    /// Deliver `recv_req_retry` to the owner of this request port.
    ReqRetry { port: PortId },
    /// Deliver `recv_resp_retry` to the owner of this response port.
    RespRetry { port: PortId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub events: u64,
    pub final_tick: Tick,
    // true when the run stopped because nothing was left to do
    pub drained: bool,
}

/// Owns the clock, the topology and every component.  Components are moved out of their slot
/// while they run, so a synchronous port call that loops back into a running component is caught
/// as `Reentrant` instead of aliasing it.
pub struct Sim {
    queue: EventQueue<Action>,
    topology: Topology,
    objects: Vec<Option<Box<dyn SimObject>>>,
    names: Vec<String>,
    events_serviced: u64,
}

impl Sim {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: EventQueue::new(name),
            topology: Topology::new(),
            objects: Vec::new(),
            names: Vec::new(),
            events_serviced: 0,
        }
    }

    pub fn now(&self) -> Tick {
        self.queue.now()
    }

    pub fn queue(&self) -> &EventQueue<Action> {
        &self.queue
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn object_name(&self, id: ComponentId) -> &str {
        self.names.get(id).map(String::as_str).unwrap_or("<unknown>")
    }

    /// Reserve a component id, build the component with it and take ownership.  The builder gets
    /// the simulator so it can register its ports and events.
    pub fn add_object<T, F>(&mut self, build: F) -> SimResult<ComponentId>
    where
        T: SimObject,
        F: FnOnce(ComponentId, &mut Sim) -> SimResult<T>,
    {
        let id = self.objects.len();
        self.objects.push(None);
        self.names.push(String::new());
        let object = match build(id, self) {
            Ok(object) => object,
            Err(err) => {
                self.objects.pop();
                self.names.pop();
                return Err(err);
            }
        };
        self.names[id] = object.name().to_string();
        self.objects[id] = Some(Box::new(object));
        Ok(id)
    }

    pub fn object<T: SimObject>(&self, id: ComponentId) -> Option<&T> {
        self.objects.get(id)?.as_ref()?.as_any().downcast_ref::<T>()
    }

    pub fn object_mut<T: SimObject>(&mut self, id: ComponentId) -> Option<&mut T> {
        self.objects
            .get_mut(id)?
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn add_port(
        &mut self,
        owner: ComponentId,
        kind: PortKind,
        local: usize,
        name: impl Into<String>,
    ) -> PortId {
        self.topology.add_port(owner, kind, local, name)
    }

    pub fn register_event(
        &mut self,
        owner: ComponentId,
        name: impl Into<String>,
        priority: Priority,
    ) -> EventId {
        self.queue.register(name, priority, Action::Process { owner })
    }

    pub fn schedule(&mut self, event: EventId, when: Tick) -> SimResult<()> {
        self.queue.schedule(event, when)
    }

    pub fn deschedule(&mut self, event: EventId) -> SimResult<()> {
        self.queue.deschedule(event)
    }

    pub fn reschedule(&mut self, event: EventId, when: Tick) -> SimResult<()> {
        self.queue.reschedule(event, when)
    }

    pub fn is_scheduled(&self, event: EventId) -> bool {
        self.queue.is_scheduled(event)
    }

    /// Schedule `event` unless it is already pending.  Returns whether this call scheduled it.
    pub fn arm(&mut self, event: EventId, when: Tick) -> SimResult<bool> {
        if self.queue.is_scheduled(event) {
            return Ok(false);
        }
        self.queue.schedule(event, when)?;
        Ok(true)
    }

    pub fn bind(&mut self, request: PortId, response: PortId) -> SimResult<()> {
        self.topology.bind(request, response)?;
        info!(
            "bind {} <-> {}",
            self.topology.name(request)?,
            self.topology.name(response)?
        );
        Ok(())
    }

    pub fn unbind(&mut self, port: PortId) -> SimResult<()> {
        self.topology.unbind(port)
    }

    /// Look up one of `owner`'s ports by its full name.
    pub fn port_by_name(&self, owner: ComponentId, name: &str) -> SimResult<PortId> {
        self.topology.find(owner, self.object_name(owner), name)
    }

    pub fn send_timing_req(&mut self, port: PortId, pkt: &PacketPtr) -> SimResult<bool> {
        self.topology.expect_kind(port, PortKind::Request)?;
        let (owner, local) = self.peer_endpoint(port)?;
        self.with_object(owner, |obj, sim| obj.recv_timing_req(sim, local, pkt))
    }

    pub fn try_timing(&mut self, port: PortId, pkt: &PacketPtr) -> SimResult<bool> {
        self.topology.expect_kind(port, PortKind::Request)?;
        let (owner, local) = self.peer_endpoint(port)?;
        self.with_object(owner, |obj, sim| obj.try_timing(sim, local, pkt))
    }

    pub fn send_timing_resp(&mut self, port: PortId, pkt: &PacketPtr) -> SimResult<bool> {
        self.topology.expect_kind(port, PortKind::Response)?;
        let (owner, local) = self.peer_endpoint(port)?;
        self.with_object(owner, |obj, sim| obj.recv_timing_resp(sim, local, pkt))
    }

    /// Tell the requester behind response port `port` it may resend.  Delivered through the
    /// queue at the current tick.
    pub fn send_retry_req(&mut self, port: PortId) -> SimResult<()> {
        self.topology.expect_kind(port, PortKind::Response)?;
        let peer = self.topology.peer(port)?;
        debug!("[tick {}] retry-req {} -> {}", self.now(), self.topology.name(port)?, self.topology.name(peer)?);
        let name = format!("{}.retry_req", self.topology.name(peer)?);
        self.queue
            .post(self.now(), Priority::DEFAULT, name, Action::ReqRetry { port: peer })?;
        Ok(())
    }

    /// Tell the responder behind request port `port` it may resend its response.
    pub fn send_retry_resp(&mut self, port: PortId) -> SimResult<()> {
        self.topology.expect_kind(port, PortKind::Request)?;
        let peer = self.topology.peer(port)?;
        debug!("[tick {}] retry-resp {} -> {}", self.now(), self.topology.name(port)?, self.topology.name(peer)?);
        let name = format!("{}.retry_resp", self.topology.name(peer)?);
        self.queue
            .post(self.now(), Priority::DEFAULT, name, Action::RespRetry { port: peer })?;
        Ok(())
    }

    pub fn init(&mut self) -> SimResult<()> {
        for id in 0..self.objects.len() {
            self.with_object(id, |obj, sim| obj.init(sim))?;
        }
        Ok(())
    }

    /// Fire the head event.  Returns `false` when the queue is empty.
    pub fn step(&mut self) -> SimResult<bool> {
        let Some(fired) = self.queue.service_one() else {
            return Ok(false);
        };
        self.events_serviced += 1;
        self.dispatch(fired)?;
        Ok(true)
    }

    /// Fire every event due at or before `limit`, then move the clock to `limit`.
    pub fn run_until(&mut self, limit: Tick) -> SimResult<RunSummary> {
        while let Some(next) = self.queue.next_tick() {
            if next > limit {
                break;
            }
            self.step()?;
        }
        self.queue.advance_to(limit);
        Ok(self.summary())
    }

    /// Run until the queue drains or the clock reaches `timeout`.
    pub fn run(&mut self, timeout: Tick) -> SimResult<RunSummary> {
        while !self.queue.is_empty() && self.now() < timeout {
            self.step()?;
        }
        let summary = self.summary();
        info!(
            "run stopped at tick {} after {} events (drained: {})",
            summary.final_tick, summary.events, summary.drained
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            events: self.events_serviced,
            final_tick: self.now(),
            drained: self.queue.is_empty(),
        }
    }

    fn dispatch(&mut self, fired: Fired<Action>) -> SimResult<()> {
        match fired.payload {
            Action::Process { owner } => {
                debug!("[tick {}] fire {}", fired.when, self.queue.event_name(fired.id)?);
                self.with_object(owner, |obj, sim| obj.process(sim, fired.id))
            }
            Action::ReqRetry { port } => {
                let (owner, local) = self.endpoint(port)?;
                self.with_object(owner, |obj, sim| obj.recv_req_retry(sim, local))
            }
            Action::RespRetry { port } => {
                let (owner, local) = self.endpoint(port)?;
                self.with_object(owner, |obj, sim| obj.recv_resp_retry(sim, local))
            }
        }
    }

    fn endpoint(&self, port: PortId) -> SimResult<(ComponentId, usize)> {
        Ok((self.topology.owner(port)?, self.topology.local(port)?))
    }

    fn peer_endpoint(&self, port: PortId) -> SimResult<(ComponentId, usize)> {
        let peer = self.topology.peer(port)?;
        self.endpoint(peer)
    }

    fn with_object<R, F>(&mut self, id: ComponentId, f: F) -> SimResult<R>
    where
        F: FnOnce(&mut dyn SimObject, &mut Sim) -> SimResult<R>,
    {
        let slot = self.objects.get_mut(id).ok_or(SimError::UnknownComponent(id))?;
        let Some(mut object) = slot.take() else {
            return Err(SimError::Reentrant {
                component: self.object_name(id).to_string(),
            });
        };
        let result = f(object.as_mut(), self);
        self.objects[id] = Some(object);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::module::sim_object;
    use crate::base::packet::Packet;
    use crate::base::timing::{TimingRequester, TimingResponder};

    // Responder that accepts every other request and counts retries it is told about.
    struct Echo {
        name: String,
        port: PortId,
        accept_next: bool,
        seen: Vec<u64>,
        resp_retries: usize,
        tick_event: EventId,
        fired_at: Vec<Tick>,
    }

    impl TimingRequester for Echo {}

    impl TimingResponder for Echo {
        fn recv_timing_req(&mut self, _sim: &mut Sim, _port: usize, pkt: &PacketPtr) -> SimResult<bool> {
            let accept = self.accept_next;
            self.accept_next = !self.accept_next;
            if accept {
                self.seen.push(pkt.id());
            }
            Ok(accept)
        }

        fn try_timing(&self, _sim: &Sim, _port: usize, _pkt: &PacketPtr) -> SimResult<bool> {
            Ok(self.accept_next)
        }

        fn recv_resp_retry(&mut self, _sim: &mut Sim, _port: usize) -> SimResult<()> {
            self.resp_retries += 1;
            Ok(())
        }
    }

    sim_object!(Echo,
        fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()> {
            assert_eq!(event, self.tick_event);
            self.fired_at.push(sim.now());
            Ok(())
        }
    );

    // Requester that calls straight back into itself through its own port.
    struct Looper {
        name: String,
        port: PortId,
        retries: usize,
    }

    impl TimingRequester for Looper {
        fn recv_req_retry(&mut self, _sim: &mut Sim, _port: usize) -> SimResult<()> {
            self.retries += 1;
            Ok(())
        }
    }

    impl TimingResponder for Looper {}

    sim_object!(Looper,
        fn process(&mut self, _sim: &mut Sim, _event: EventId) -> SimResult<()> {
            Ok(())
        }
    );

    fn build() -> (Sim, ComponentId, ComponentId) {
        let mut sim = Sim::new("test");
        let looper = sim
            .add_object(|id, sim| {
                Ok(Looper {
                    name: "looper".to_string(),
                    port: sim.add_port(id, PortKind::Request, 0, "looper.mem_side"),
                    retries: 0,
                })
            })
            .unwrap();
        let echo = sim
            .add_object(|id, sim| {
                Ok(Echo {
                    name: "echo".to_string(),
                    port: sim.add_port(id, PortKind::Response, 0, "echo.cpu_side"),
                    accept_next: true,
                    seen: Vec::new(),
                    resp_retries: 0,
                    tick_event: sim.register_event(id, "echo.tick", Priority::DEFAULT),
                    fired_at: Vec::new(),
                })
            })
            .unwrap();
        (sim, looper, echo)
    }

    fn ports(sim: &Sim, looper: ComponentId, echo: ComponentId) -> (PortId, PortId) {
        (
            sim.object::<Looper>(looper).unwrap().port,
            sim.object::<Echo>(echo).unwrap().port,
        )
    }

    #[test]
    fn failed_builder_leaves_no_slot_behind() {
        let (mut sim, _, _) = build();
        let err = sim
            .add_object::<Looper, _>(|_, _| Err(SimError::InvalidConfig("no ports".to_string())))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
        assert_eq!(sim.num_objects(), 2);
        sim.init().unwrap();
    }

    #[test]
    fn unbound_send_fails_with_unbound_port() {
        let (mut sim, looper, echo) = build();
        let (req, _) = ports(&sim, looper, echo);
        let err = sim.send_timing_req(req, &Packet::read(0, 4)).unwrap_err();
        assert!(matches!(err, SimError::UnboundPort { .. }));
    }

    #[test]
    fn send_request_runs_peer_handler_synchronously() {
        let (mut sim, looper, echo) = build();
        let (req, resp) = ports(&sim, looper, echo);
        sim.bind(req, resp).unwrap();
        let pkt = Packet::read(0x10, 4);
        assert!(sim.try_timing(req, &pkt).unwrap());
        assert!(sim.send_timing_req(req, &pkt).unwrap());
        assert!(!sim.try_timing(req, &pkt).unwrap());
        assert!(!sim.send_timing_req(req, &pkt).unwrap());
        assert_eq!(sim.object::<Echo>(echo).unwrap().seen, vec![pkt.id()]);
    }

    #[test]
    fn retries_are_delivered_through_the_queue() {
        let (mut sim, looper, echo) = build();
        let (req, resp) = ports(&sim, looper, echo);
        sim.bind(req, resp).unwrap();
        sim.send_retry_req(resp).unwrap();
        sim.send_retry_resp(req).unwrap();
        assert_eq!(sim.object::<Looper>(looper).unwrap().retries, 0);
        let summary = sim.run(100).unwrap();
        assert!(summary.drained);
        assert_eq!(summary.events, 2);
        assert_eq!(sim.object::<Looper>(looper).unwrap().retries, 1);
        assert_eq!(sim.object::<Echo>(echo).unwrap().resp_retries, 1);
    }

    #[test]
    fn sending_on_the_wrong_side_is_rejected() {
        let (mut sim, looper, echo) = build();
        let (req, resp) = ports(&sim, looper, echo);
        sim.bind(req, resp).unwrap();
        let pkt = Packet::read(0, 4);
        assert!(matches!(
            sim.send_timing_resp(req, &pkt),
            Err(SimError::PortKindMismatch { .. })
        ));
        // the looper never registered a response handler
        assert!(matches!(
            sim.send_timing_resp(resp, &pkt),
            Err(SimError::UnexpectedCall { call: "recv_timing_resp", .. })
        ));
    }

    #[test]
    fn calling_back_into_a_running_component_is_reentrant() {
        let (mut sim, looper, echo) = build();
        let (req, resp) = ports(&sim, looper, echo);
        sim.bind(req, resp).unwrap();
        let err = sim
            .with_object(looper, |_, sim| sim.send_timing_resp(resp, &Packet::read(0, 4)))
            .unwrap_err();
        assert!(matches!(err, SimError::Reentrant { .. }));
    }

    #[test]
    fn arm_is_idempotent_and_run_until_moves_clock() {
        let (mut sim, _, echo) = build();
        let event = sim.object::<Echo>(echo).unwrap().tick_event;
        assert!(sim.arm(event, 5).unwrap());
        assert!(!sim.arm(event, 6).unwrap());
        let summary = sim.run_until(20).unwrap();
        assert_eq!(summary.final_tick, 20);
        assert_eq!(sim.object::<Echo>(echo).unwrap().fired_at, vec![5]);
        assert!(matches!(
            sim.schedule(event, 19),
            Err(SimError::ScheduleInPast { .. })
        ));
    }

    #[test]
    fn unbind_then_send_fails() {
        let (mut sim, looper, echo) = build();
        let (req, resp) = ports(&sim, looper, echo);
        sim.bind(req, resp).unwrap();
        sim.unbind(req).unwrap();
        assert!(matches!(sim.send_retry_req(resp), Err(SimError::UnboundPort { .. })));
    }
}
