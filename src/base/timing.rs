// Receive side of the timing protocol.  A component implements the half that matches the ports
// it owns; every handler it leaves alone fails with `UnexpectedCall`.
//
// `port` is always the component-local index given to `Topology::add_port`.

use crate::base::packet::PacketPtr;
use crate::error::{SimError, SimResult};
use crate::sim::top::Sim;

fn unexpected(component: &str, call: &'static str, port: usize) -> SimError {
    SimError::UnexpectedCall {
        component: component.to_string(),
        call,
        port,
    }
}

/// Handlers behind a request port.
pub trait TimingRequester {
    /// A response arrived from the peer.  Returning `false` rejects it; the peer then waits for a
    /// response-retry before sending it again.
    fn recv_timing_resp(&mut self, _sim: &mut Sim, port: usize, _pkt: &PacketPtr) -> SimResult<bool> {
        Err(unexpected(std::any::type_name::<Self>(), "recv_timing_resp", port))
    }

    /// The peer can take the request it rejected earlier.
    fn recv_req_retry(&mut self, _sim: &mut Sim, port: usize) -> SimResult<()> {
        Err(unexpected(std::any::type_name::<Self>(), "recv_req_retry", port))
    }
}

/// Handlers behind a response port.
pub trait TimingResponder {
    /// A request arrived from the peer.  Returning `false` rejects it and latches a request-retry
    /// owed to the peer.
    fn recv_timing_req(&mut self, _sim: &mut Sim, port: usize, _pkt: &PacketPtr) -> SimResult<bool> {
        Err(unexpected(std::any::type_name::<Self>(), "recv_timing_req", port))
    }

    /// Advisory probe: would `recv_timing_req` accept this packet right now?  Must not change any
    /// state.
    fn try_timing(&self, _sim: &Sim, port: usize, _pkt: &PacketPtr) -> SimResult<bool> {
        Err(unexpected(std::any::type_name::<Self>(), "try_timing", port))
    }

    /// The peer can take the response it rejected earlier.
    fn recv_resp_retry(&mut self, _sim: &mut Sim, port: usize) -> SimResult<()> {
        Err(unexpected(std::any::type_name::<Self>(), "recv_resp_retry", port))
    }
}
