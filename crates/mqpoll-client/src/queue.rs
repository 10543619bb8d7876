//! Ordered event buffer between the transport callbacks and the session.

use std::collections::VecDeque;

use crate::events::Event;

/// FIFO of events in arrival order.
///
/// Only the response matcher moves events out of arrival order, and it puts
/// every event it skipped back at the front, oldest first, before returning.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the back.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Remove and return the oldest event.
    pub fn pop_front(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Reinsert an event at the front.
    pub fn push_front(&mut self, event: Event) {
        self.events.push_front(event);
    }

    /// Put back events that were popped in order, restoring their positions.
    pub fn restore(&mut self, skipped: Vec<Event>) {
        for event in skipped.into_iter().rev() {
            self.events.push_front(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drop every event for which `keep` returns false.
    pub fn retain(&mut self, keep: impl FnMut(&Event) -> bool) {
        self.events.retain(keep);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
