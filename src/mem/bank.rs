use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::base::packet::{Addr, PacketPtr};
use crate::error::{SimError, SimResult};

/// Which per-upstream queue an arbitration scan drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Read,
    Write,
}

/// A read that was accepted and is waiting for its data.
#[derive(Debug, Clone)]
pub struct Waiter {
    pub packet: PacketPtr,
    pub upstream: usize,
}

/// Per-bank queues, budget and retry bookkeeping of the arbiter.  Nothing in here touches ports;
/// the caller supplies the downstream send as a closure.
#[derive(Debug)]
pub struct BankState {
    name: String,
    index: usize,
    buffer_size: usize,
    read_queues: Vec<VecDeque<PacketPtr>>,
    write_queues: Vec<VecDeque<PacketPtr>>,
    // accepted reads that have not come back from downstream yet
    outstanding: usize,
    // same-address reads resolve first-in first-out
    waiting: HashMap<Addr, VecDeque<Waiter>>,
    responses: VecDeque<Waiter>,
    req_retry_owed: Vec<bool>,
    resp_retry_owed: Vec<bool>,
    read_cursor: usize,
    write_cursor: usize,
}

impl BankState {
    pub fn new(name: impl Into<String>, index: usize, num_upstreams: usize, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            index,
            buffer_size,
            read_queues: vec![VecDeque::new(); num_upstreams],
            write_queues: vec![VecDeque::new(); num_upstreams],
            outstanding: 0,
            waiting: HashMap::new(),
            responses: VecDeque::new(),
            req_retry_owed: vec![false; num_upstreams],
            resp_retry_owed: vec![false; num_upstreams],
            read_cursor: 0,
            write_cursor: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_upstreams(&self) -> usize {
        self.read_queues.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    /// Slots of the shared read budget in use.
    pub fn budget_used(&self) -> usize {
        self.outstanding + self.responses.len()
    }

    pub fn read_queue_len(&self, upstream: usize) -> usize {
        self.read_queues[upstream].len()
    }

    pub fn write_queue_len(&self, upstream: usize) -> usize {
        self.write_queues[upstream].len()
    }

    pub fn cursor(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Read => self.read_cursor,
            QueueKind::Write => self.write_cursor,
        }
    }

    /// Number of reads parked in the outstanding-read table.
    pub fn waiting_reads(&self) -> usize {
        self.waiting.values().map(VecDeque::len).sum()
    }

    pub fn owes_req_retry(&self, upstream: usize) -> bool {
        self.req_retry_owed[upstream]
    }

    pub fn owes_resp_retry(&self, upstream: usize) -> bool {
        self.resp_retry_owed[upstream]
    }

    pub fn can_accept(&self, upstream: usize, pkt: &PacketPtr) -> bool {
        if pkt.is_write() {
            self.write_queues[upstream].len() < self.buffer_size
        } else {
            self.budget_used() < self.buffer_size
        }
    }

    /// Take a request from `upstream` or latch a request-retry for it.
    pub fn admit(&mut self, upstream: usize, pkt: &PacketPtr) -> SimResult<bool> {
        if !self.can_accept(upstream, pkt) {
            self.req_retry_owed[upstream] = true;
            return Ok(false);
        }
        if pkt.is_write() {
            self.write_queues[upstream].push_back(Rc::clone(pkt));
        } else {
            self.read_queues[upstream].push_back(Rc::clone(pkt));
            self.waiting.entry(pkt.addr()).or_default().push_back(Waiter {
                packet: Rc::clone(pkt),
                upstream,
            });
            self.outstanding += 1;
        }
        self.check_capacity(upstream)?;
        Ok(true)
    }

    // the shared read budget and every write queue stay within buffer_size
    fn check_capacity(&self, upstream: usize) -> SimResult<()> {
        let breach = |what| SimError::CapacityExceeded {
            owner: self.name.clone(),
            what,
            capacity: self.buffer_size,
        };
        if self.budget_used() > self.buffer_size {
            return Err(breach("read budget"));
        }
        if self.write_queues[upstream].len() > self.buffer_size {
            return Err(breach("write queue"));
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.read_queues.iter().any(|q| !q.is_empty())
            || self.write_queues.iter().any(|q| !q.is_empty())
    }

    /// Round-robin over the `kind` queues starting at the cursor.  The first head that `forward`
    /// accepts is dequeued and the cursor moves just past its upstream.  A head that is refused
    /// stays put and the scan moves on to the next upstream.
    pub fn scan<F>(&mut self, kind: QueueKind, mut forward: F) -> SimResult<Option<usize>>
    where
        F: FnMut(&PacketPtr) -> SimResult<bool>,
    {
        let n = self.num_upstreams();
        let (queues, cursor) = match kind {
            QueueKind::Read => (&mut self.read_queues, &mut self.read_cursor),
            QueueKind::Write => (&mut self.write_queues, &mut self.write_cursor),
        };
        for offset in 0..n {
            let upstream = (*cursor + offset) % n;
            let Some(head) = queues[upstream].front() else {
                continue;
            };
            if forward(head)? {
                queues[upstream].pop_front();
                *cursor = (upstream + 1) % n;
                return Ok(Some(upstream));
            }
        }
        Ok(None)
    }

    /// Match a downstream read response with the oldest waiter for its address and queue the
    /// waiter for delivery.  The waiter's payload is filled from `pkt` when they differ.
    pub fn complete_read(&mut self, pkt: &PacketPtr) -> SimResult<Waiter> {
        let addr = pkt.addr();
        let unexpected = || SimError::UnexpectedResponse {
            owner: self.name.clone(),
            bank: self.index,
            addr,
        };
        let waiters = self.waiting.get_mut(&addr).ok_or_else(unexpected)?;
        let waiter = waiters.pop_front().ok_or_else(unexpected)?;
        if waiters.is_empty() {
            self.waiting.remove(&addr);
        }
        self.outstanding = self.outstanding.checked_sub(1).ok_or_else(unexpected)?;
        if !Rc::ptr_eq(&waiter.packet, pkt) {
            waiter.packet.set_data(pkt.data());
        }
        self.responses.push_back(waiter.clone());
        self.check_capacity(waiter.upstream)?;
        Ok(waiter)
    }

    /// Head of the response FIFO unless its destination is waiting on a response-retry.
    pub fn deliverable(&self) -> Option<&Waiter> {
        self.responses
            .front()
            .filter(|w| !self.resp_retry_owed[w.upstream])
    }

    pub fn pop_response(&mut self) -> Option<Waiter> {
        self.responses.pop_front()
    }

    pub fn mark_resp_retry(&mut self, upstream: usize) {
        self.resp_retry_owed[upstream] = true;
    }

    /// Clear a response-retry flag; returns whether one was set.
    pub fn clear_resp_retry(&mut self, upstream: usize) -> bool {
        std::mem::replace(&mut self.resp_retry_owed[upstream], false)
    }

    /// Clear a request-retry flag; returns whether one was set.
    pub fn take_req_retry(&mut self, upstream: usize) -> bool {
        std::mem::replace(&mut self.req_retry_owed[upstream], false)
    }

    /// Clear and return every request-retry owed by this bank, `first` leading.
    pub fn take_req_retries(&mut self, first: usize) -> Vec<usize> {
        let n = self.num_upstreams();
        (0..n)
            .map(|offset| (first + offset) % n)
            .filter(|&up| self.take_req_retry(up))
            .collect()
    }
}
