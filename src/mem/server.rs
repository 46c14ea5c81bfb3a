/*
A TimedServer stands in for a resource with a fixed access latency and an optional transfer
throughput.  It owns a bounded FIFO of in-flight work: every accepted request gets a `Ticket`
saying when it becomes ready, and stays in the FIFO (counting against the capacity) until its
owner pops it.  A request that would overflow the FIFO comes back as `Backpressure`.

Service law: a request starts transferring once the previous transfer is finished, takes
ceil(size / bytes_per_cycle) cycles, and is ready `base_latency` cycles later.  With
bytes_per_cycle = 0 transfers are free and the server is fully pipelined.
*/

use std::collections::VecDeque;

use crate::sim::config::MemConfig;
use crate::timeq::Tick;

// Result of queueing a request with a timed server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Tick,
    ready_at: Tick,
    size_bytes: usize,
}

impl Ticket {
    pub fn issued_at(&self) -> Tick {
        self.issued_at
    }

    pub fn ready_at(&self) -> Tick {
        self.ready_at
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Tick) -> bool {
        now >= self.ready_at
    }
}

// Why the server refused a request; the payload is handed back
#[derive(Debug)]
pub enum Backpressure<T> {
    QueueFull { payload: T, capacity: usize },
}

impl<T> Backpressure<T> {
    pub fn into_payload(self) -> T {
        match self {
            Backpressure::QueueFull { payload, .. } => payload,
        }
    }
}

#[derive(Debug)]
struct Inflight<T> {
    payload: T,
    ticket: Ticket,
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: MemConfig,
    inflight: VecDeque<Inflight<T>>,
    busy_until: Tick,
}

impl<T> TimedServer<T> {
    pub fn new(config: MemConfig) -> Self {
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inflight.len() >= self.config.queue_capacity
    }

    pub fn try_enqueue(
        &mut self,
        now: Tick,
        payload: T,
        size_bytes: usize,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.is_full() {
            return Err(Backpressure::QueueFull {
                payload,
                capacity: self.config.queue_capacity,
            });
        }
        let start = self.busy_until.max(now);
        let done = start.saturating_add(self.transfer_cycles(size_bytes));
        self.busy_until = done;
        let ticket = Ticket {
            issued_at: now,
            ready_at: done.saturating_add(self.config.base_latency),
            size_bytes,
        };
        self.inflight.push_back(Inflight { payload, ticket });
        Ok(ticket)
    }

    /// Oldest request if it is ready at `now`.
    pub fn ready(&self, now: Tick) -> Option<(&T, &Ticket)> {
        self.inflight
            .front()
            .filter(|f| f.ticket.is_ready(now))
            .map(|f| (&f.payload, &f.ticket))
    }

    pub fn pop_front(&mut self) -> Option<(T, Ticket)> {
        self.inflight.pop_front().map(|f| (f.payload, f.ticket))
    }

    pub fn oldest_ticket(&self) -> Option<&Ticket> {
        self.inflight.front().map(|f| &f.ticket)
    }

    fn transfer_cycles(&self, size_bytes: usize) -> Tick {
        match self.config.bytes_per_cycle {
            0 => 0,
            bpc => (size_bytes as u64).div_ceil(bpc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(base_latency: u64, bytes_per_cycle: u64, queue_capacity: usize) -> TimedServer<u32> {
        TimedServer::new(MemConfig {
            base_latency,
            bytes_per_cycle,
            queue_capacity,
        })
    }

    #[test]
    fn pipelined_server_adds_fixed_latency() {
        let mut s = server(10, 0, 4);
        assert_eq!(s.try_enqueue(0, 1, 64).unwrap().ready_at(), 10);
        assert_eq!(s.try_enqueue(0, 2, 64).unwrap().ready_at(), 10);
        assert_eq!(s.try_enqueue(3, 3, 64).unwrap().ready_at(), 13);
        assert!(s.ready(9).is_none());
        assert_eq!(s.ready(10).map(|(p, _)| *p), Some(1));
    }

    #[test]
    fn throughput_serialises_transfers() {
        let mut s = server(2, 8, 4);
        assert_eq!(s.try_enqueue(0, 1, 16).unwrap().ready_at(), 4);
        // second transfer starts once the first one is off the bus
        assert_eq!(s.try_enqueue(0, 2, 8).unwrap().ready_at(), 5);
        assert_eq!(s.try_enqueue(20, 3, 1).unwrap().ready_at(), 23);
    }

    #[test]
    fn full_queue_hands_payload_back() {
        let mut s = server(1, 0, 1);
        s.try_enqueue(0, 1, 4).unwrap();
        let err = s.try_enqueue(0, 2, 4).unwrap_err();
        assert_eq!(err.into_payload(), 2);
        assert_eq!(s.pop_front().map(|(p, _)| p), Some(1));
        assert!(!s.is_full());
    }
}
