/*
Time-queue for the simulation kernel.

The queue holds every pending timestamped action and is the only place where simulated time
advances.  Events live in an arena and are addressed by `EventId`; the queue never owns the
component that reacts to an event, it only hands the fired event back to whoever drives it.

Pending events are kept in a single ordered list keyed by `(when, priority)`.  A new event is
inserted right after the last event whose key is less than or equal to its own, so events that
share a key fire in the order they were scheduled.  Insertion walks the list, removal of the head
is O(1); the number of simultaneously pending events is bounded by in-flight transactions, not
by simulated time.

Scheduling a pending event, scheduling into the past and descheduling an idle event are
programming errors and come back as `SimError`s.
*/

use std::collections::VecDeque;
use std::fmt;

use crate::error::{SimError, SimResult};

pub type Tick = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i8);

impl Priority {
    pub const MINIMUM: Priority = Priority(-102);
    pub const DEBUG_ENABLE: Priority = Priority(-101);
    pub const DEBUG_BREAK: Priority = Priority(-100);
    pub const CPU_SWITCH: Priority = Priority(-31);
    pub const DELAYED_WRITEBACK: Priority = Priority(-1);
    pub const DEFAULT: Priority = Priority(0);
    pub const DVFS_UPDATE: Priority = Priority(31);
    pub const SERIALIZE: Priority = Priority(32);
    pub const CPU_TICK: Priority = Priority(50);
    pub const CPU_EXIT: Priority = Priority(64);
    pub const STAT_EVENT: Priority = Priority(90);
    pub const PROGRESS_EVENT: Priority = Priority(95);
    pub const SIM_EXIT: Priority = Priority(100);
    pub const MAXIMUM: Priority = Priority(102);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to an event slot in the queue's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(usize);

impl EventId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An event that has just been removed from the head of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    pub id: EventId,
    pub when: Tick,
    pub payload: T,
}

#[derive(Debug)]
struct Slot<T> {
    name: String,
    when: Tick,
    priority: Priority,
    scheduled: bool,
    // one-shot events are released from the arena once they fire
    transient: bool,
    payload: T,
}

impl<T> Slot<T> {
    fn key(&self) -> (Tick, Priority) {
        (self.when, self.priority)
    }
}

#[derive(Debug)]
pub struct EventQueue<T> {
    name: String,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    order: VecDeque<EventId>,
    cur_tick: Tick,
}

impl<T: Clone> EventQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
            free: Vec::new(),
            order: VecDeque::new(),
            cur_tick: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now(&self) -> Tick {
        self.cur_tick
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Tick of the head event, if any.
    pub fn next_tick(&self) -> Option<Tick> {
        self.order.front().and_then(|&id| self.slot(id).ok()).map(|slot| slot.when)
    }

    /// Create a persistent event.  The slot stays allocated until `unregister`.
    pub fn register(&mut self, name: impl Into<String>, priority: Priority, payload: T) -> EventId {
        self.alloc(Slot {
            name: name.into(),
            when: 0,
            priority,
            scheduled: false,
            transient: false,
            payload,
        })
    }

    pub fn unregister(&mut self, id: EventId) -> SimResult<()> {
        let slot = self.slot(id)?;
        if slot.scheduled {
            return Err(SimError::AlreadyScheduled {
                name: slot.name.clone(),
                when: slot.when,
            });
        }
        self.slots[id.0] = None;
        self.free.push(id.0);
        Ok(())
    }

    /// Create a one-shot event and schedule it at `when`.
    pub fn post(
        &mut self,
        when: Tick,
        priority: Priority,
        name: impl Into<String>,
        payload: T,
    ) -> SimResult<EventId> {
        let id = self.alloc(Slot {
            name: name.into(),
            when: 0,
            priority,
            scheduled: false,
            transient: true,
            payload,
        });
        if let Err(err) = self.schedule(id, when) {
            self.slots[id.0] = None;
            self.free.push(id.0);
            return Err(err);
        }
        Ok(id)
    }

    pub fn schedule(&mut self, id: EventId, when: Tick) -> SimResult<()> {
        let now = self.cur_tick;
        let slot = self.slot_mut(id)?;
        if slot.scheduled {
            return Err(SimError::AlreadyScheduled {
                name: slot.name.clone(),
                when: slot.when,
            });
        }
        if when < now {
            return Err(SimError::ScheduleInPast {
                name: slot.name.clone(),
                when,
                now,
            });
        }
        slot.when = when;
        slot.scheduled = true;
        self.insert(id);
        Ok(())
    }

    pub fn deschedule(&mut self, id: EventId) -> SimResult<()> {
        let slot = self.slot(id)?;
        if !slot.scheduled {
            return Err(SimError::NotScheduled {
                name: slot.name.clone(),
            });
        }
        self.remove(id)?;
        let transient = self.slot(id)?.transient;
        if transient {
            self.slots[id.0] = None;
            self.free.push(id.0);
        } else {
            self.slot_mut(id)?.scheduled = false;
        }
        Ok(())
    }

    /// Move an event to `when`, whether or not it is currently pending.
    pub fn reschedule(&mut self, id: EventId, when: Tick) -> SimResult<()> {
        let now = self.cur_tick;
        let slot = self.slot(id)?;
        if when < now {
            return Err(SimError::ScheduleInPast {
                name: slot.name.clone(),
                when,
                now,
            });
        }
        if slot.scheduled {
            self.remove(id)?;
        }
        let slot = self.slot_mut(id)?;
        slot.when = when;
        slot.scheduled = true;
        self.insert(id);
        Ok(())
    }

    /// Pop the head event and advance the clock to its tick.  The caller runs the action.
    pub fn service_one(&mut self) -> Option<Fired<T>> {
        let id = self.order.pop_front()?;
        let slot = self.slots[id.0].as_mut()?;
        slot.scheduled = false;
        let fired = Fired {
            id,
            when: slot.when,
            payload: slot.payload.clone(),
        };
        if slot.transient {
            self.slots[id.0] = None;
            self.free.push(id.0);
        }
        debug_assert!(fired.when >= self.cur_tick);
        self.cur_tick = fired.when;
        Some(fired)
    }

    /// Move the clock forward without firing anything.  Never moves past a pending event.
    pub fn advance_to(&mut self, tick: Tick) {
        let limit = self.next_tick().unwrap_or(Tick::MAX);
        self.cur_tick = self.cur_tick.max(tick.min(limit));
    }

    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.slot(id).map(|slot| slot.scheduled).unwrap_or(false)
    }

    pub fn when(&self, id: EventId) -> SimResult<Tick> {
        Ok(self.slot(id)?.when)
    }

    pub fn priority(&self, id: EventId) -> SimResult<Priority> {
        Ok(self.slot(id)?.priority)
    }

    pub fn event_name(&self, id: EventId) -> SimResult<&str> {
        Ok(self.slot(id)?.name.as_str())
    }

    pub fn payload(&self, id: EventId) -> SimResult<&T> {
        Ok(&self.slot(id)?.payload)
    }

    fn alloc(&mut self, slot: Slot<T>) -> EventId {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                EventId(idx)
            }
            None => {
                self.slots.push(Some(slot));
                EventId(self.slots.len() - 1)
            }
        }
    }

    fn slot(&self, id: EventId) -> SimResult<&Slot<T>> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(SimError::UnknownEvent(id.0))
    }

    fn slot_mut(&mut self, id: EventId) -> SimResult<&mut Slot<T>> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(SimError::UnknownEvent(id.0))
    }

    fn key_of(&self, id: EventId) -> (Tick, Priority) {
        self.slots[id.0]
            .as_ref()
            .map(Slot::key)
            .unwrap_or((Tick::MAX, Priority::MAXIMUM))
    }

    fn insert(&mut self, id: EventId) {
        let key = self.key_of(id);
        let pos = self.order.partition_point(|&other| self.key_of(other) <= key);
        self.order.insert(pos, id);
    }

    fn remove(&mut self, id: EventId) -> SimResult<()> {
        let key = self.key_of(id);
        let start = self.order.partition_point(|&other| self.key_of(other) < key);
        let pos = self
            .order
            .iter()
            .skip(start)
            .take_while(|&&other| self.key_of(other) == key)
            .position(|&other| other == id)
            .map(|offset| start + offset);
        match pos {
            Some(pos) => {
                self.order.remove(pos);
                Ok(())
            }
            None => Err(SimError::NotScheduled {
                name: self.slot(id)?.name.clone(),
            }),
        }
    }
}
