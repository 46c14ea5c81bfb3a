// `Topology` records every port in the system and which pair of ports is bound.  Both directions
// of a binding live in the same registry entry pair and are written by one call, so there is no
// half-bound state to observe.
use std::fmt;

use crate::base::module::ComponentId;
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Sends requests, receives responses and request-retries.
    Request,
    /// Receives requests, sends responses and request-retries.
    Response,
}

impl PortKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(usize);

impl PortId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct PortEntry {
    name: String,
    owner: ComponentId,
    kind: PortKind,
    // index the owning component uses to tell its own ports apart
    local: usize,
    peer: Option<PortId>,
}

#[derive(Debug, Default)]
pub struct Topology {
    ports: Vec<PortEntry>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn add_port(
        &mut self,
        owner: ComponentId,
        kind: PortKind,
        local: usize,
        name: impl Into<String>,
    ) -> PortId {
        self.ports.push(PortEntry {
            name: name.into(),
            owner,
            kind,
            local,
            peer: None,
        });
        PortId(self.ports.len() - 1)
    }

    /// Bind a request port to a response port.  Both must currently be unbound.
    pub fn bind(&mut self, request: PortId, response: PortId) -> SimResult<()> {
        self.expect_kind(request, PortKind::Request)?;
        self.expect_kind(response, PortKind::Response)?;
        for port in [request, response] {
            if let Some(peer) = self.entry(port)?.peer {
                return Err(SimError::AlreadyBound {
                    port: self.name(port)?.to_string(),
                    peer: self.name(peer)?.to_string(),
                });
            }
        }
        self.ports[request.0].peer = Some(response);
        self.ports[response.0].peer = Some(request);
        Ok(())
    }

    /// Unbind `port` and its peer.  Either end of the pair may be passed.
    pub fn unbind(&mut self, port: PortId) -> SimResult<()> {
        let peer = self.peer(port)?;
        self.ports[port.0].peer = None;
        self.ports[peer.0].peer = None;
        Ok(())
    }

    pub fn peer(&self, port: PortId) -> SimResult<PortId> {
        let entry = self.entry(port)?;
        entry.peer.ok_or_else(|| SimError::UnboundPort {
            port: entry.name.clone(),
        })
    }

    pub fn is_bound(&self, port: PortId) -> bool {
        self.entry(port).map(|e| e.peer.is_some()).unwrap_or(false)
    }

    pub fn name(&self, port: PortId) -> SimResult<&str> {
        Ok(self.entry(port)?.name.as_str())
    }

    pub fn owner(&self, port: PortId) -> SimResult<ComponentId> {
        Ok(self.entry(port)?.owner)
    }

    pub fn local(&self, port: PortId) -> SimResult<usize> {
        Ok(self.entry(port)?.local)
    }

    /// Resolve a port by its full name among the ports of `owner`.
    pub fn find(&self, owner: ComponentId, owner_name: &str, name: &str) -> SimResult<PortId> {
        self.ports
            .iter()
            .position(|e| e.owner == owner && e.name == name)
            .map(PortId)
            .ok_or_else(|| SimError::UnknownPort {
                owner: owner_name.to_string(),
                name: name.to_string(),
            })
    }

    pub fn expect_kind(&self, port: PortId, kind: PortKind) -> SimResult<()> {
        let entry = self.entry(port)?;
        if entry.kind != kind {
            return Err(SimError::PortKindMismatch {
                port: entry.name.clone(),
                expected: kind.as_str(),
                actual: entry.kind.as_str(),
            });
        }
        Ok(())
    }

    fn entry(&self, port: PortId) -> SimResult<&PortEntry> {
        self.ports.get(port.0).ok_or_else(|| SimError::UnknownPort {
            owner: "topology".to_string(),
            name: port.to_string(),
        })
    }
}
