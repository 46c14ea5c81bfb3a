use thiserror::Error;

use crate::timeq::Tick;

/// Fatal simulation errors.  Every variant is a wiring or invariant bug; backpressure is never
/// reported through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("event '{name}' is already scheduled for tick {when}")]
    AlreadyScheduled { name: String, when: Tick },
    #[error("cannot schedule event '{name}' at tick {when}, current tick is {now}")]
    ScheduleInPast { name: String, when: Tick, now: Tick },
    #[error("event '{name}' is not scheduled")]
    NotScheduled { name: String },
    #[error("unknown event id {0}")]
    UnknownEvent(usize),
    #[error("use of unbound port '{port}'")]
    UnboundPort { port: String },
    #[error("port '{port}' is already bound to '{peer}'")]
    AlreadyBound { port: String, peer: String },
    #[error("port '{port}' is a {actual} port, expected a {expected} port")]
    PortKindMismatch {
        port: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{owner} has no port named '{name}'")]
    UnknownPort { owner: String, name: String },
    #[error("{owner}: response for address {addr:#x} on bank {bank} has no outstanding read")]
    UnexpectedResponse { owner: String, bank: usize, addr: u64 },
    #[error("{component} was not expecting {call} on port {port}")]
    UnexpectedCall {
        component: String,
        call: &'static str,
        port: usize,
    },
    #[error("unknown component id {0}")]
    UnknownComponent(usize),
    #[error("re-entrant call into {component} while it is handling another call")]
    Reentrant { component: String },
    #[error("{owner}: {what} exceeded its capacity of {capacity}")]
    CapacityExceeded {
        owner: String,
        what: &'static str,
        capacity: usize,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SimResult<T> = Result<T, SimError>;
