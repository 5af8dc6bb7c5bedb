//! Queues at the edge of the engine: live events waiting for the next
//! render call and the log of dispatched events.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use kq_ir::{Error, Event, Result};

/// Maximum number of live events between two render calls.
pub const LIVE_EVENTS_MAX: usize = 256;

/// An event together with the channel it fired on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelEvent {
    pub channel: usize,
    pub event: Event,
}

/// Live events fired through the API, in call order.
#[derive(Clone, Debug, Default)]
pub struct LiveQueue {
    events: heapless::Deque<ChannelEvent, LIVE_EVENTS_MAX>,
}

impl LiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, channel: usize, event: Event) -> Result<()> {
        self.events
            .push_back(ChannelEvent { channel, event })
            .map_err(|_| Error::memory("live event queue is full"))
    }

    pub fn pop(&mut self) -> Option<ChannelEvent> {
        self.events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Bounded log of dispatched events. When full, the oldest entry is
/// dropped.
#[derive(Clone, Debug)]
pub struct EventLog {
    entries: VecDeque<ChannelEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut entries = VecDeque::new();
        entries.try_reserve_exact(capacity)?;
        Ok(Self { entries, capacity })
    }

    pub fn push(&mut self, channel: usize, event: Event) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ChannelEvent { channel, event });
    }

    /// Remove and return every logged event, oldest first.
    pub fn drain(&mut self) -> Vec<ChannelEvent> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
