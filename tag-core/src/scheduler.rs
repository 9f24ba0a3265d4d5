//! Cooperative delayed-event queue. Single-threaded; the tick loop polls it.

use std::cmp::Reverse;

/// Handle returned by `add_event`, usable with `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

struct ScheduledEvent<T> {
    handle: EventHandle,
    trigger_at: u32,
    payload: T,
}

/// Pending events keyed by absolute trigger time (milliseconds, wrapping `u32`).
/// Payloads are returned from `tick` for the owner to dispatch.
pub struct Scheduler<T> {
    events: Vec<ScheduledEvent<T>>,
    next_handle: u64,
}

/// True once `now` has reached `trigger_at`, treating the clock as wrapping.
/// Valid while delays stay under half the `u32` range (~24 days of ms).
fn is_due(trigger_at: u32, now: u32) -> bool {
    (now.wrapping_sub(trigger_at) as i32) >= 0
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_handle: 0,
        }
    }

    /// Schedule `payload` to fire `delay` ms after `now`.
    pub fn add_event(&mut self, now: u32, delay: u32, payload: T) -> EventHandle {
        let handle = EventHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.events.push(ScheduledEvent {
            handle,
            trigger_at: now.wrapping_add(delay),
            payload,
        });
        handle
    }

    /// Remove and return every event due at `now`, earliest first; equal trigger
    /// times keep insertion order. Events added after this returns wait for the next tick.
    pub fn tick(&mut self, now: u32) -> Vec<T> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.events.len() {
            if is_due(self.events[i].trigger_at, now) {
                due.push(self.events.remove(i));
            } else {
                i += 1;
            }
        }
        // Stable sort: ties stay in insertion order.
        due.sort_by_key(|e| Reverse(now.wrapping_sub(e.trigger_at)));
        due.into_iter().map(|e| e.payload).collect()
    }

    /// Drop a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.handle != handle);
        self.events.len() != before
    }

    /// Keep only pending events whose payload matches `keep`.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, mut keep: F) {
        self.events.retain(|e| keep(&e.payload));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Milliseconds from `now` until the earliest pending event (0 if already due).
    pub fn next_due(&self, now: u32) -> Option<u32> {
        self.events
            .iter()
            .map(|e| {
                if is_due(e.trigger_at, now) {
                    0
                } else {
                    e.trigger_at.wrapping_sub(now)
                }
            })
            .min()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_fire_early() {
        let mut s = Scheduler::new();
        s.add_event(0, 100, "a");
        assert!(s.tick(99).is_empty());
        assert_eq!(s.tick(100), vec!["a"]);
        assert!(s.is_empty());
    }

    #[test]
    fn fires_exactly_once() {
        let mut s = Scheduler::new();
        s.add_event(0, 10, 1);
        assert_eq!(s.tick(50), vec![1]);
        assert!(s.tick(60).is_empty());
    }

    #[test]
    fn past_events_fire_in_one_tick_by_time_then_insertion() {
        let mut s = Scheduler::new();
        s.add_event(0, 30, "late");
        s.add_event(0, 10, "first-tie");
        s.add_event(0, 10, "second-tie");
        s.add_event(0, 500, "future");
        assert_eq!(s.tick(100), vec!["first-tie", "second-tie", "late"]);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn events_added_during_dispatch_wait_for_next_tick() {
        let mut s = Scheduler::new();
        s.add_event(0, 0, 1u32);
        for payload in s.tick(5) {
            // Zero delay re-arm from inside the dispatch loop.
            s.add_event(5, 0, payload + 1);
        }
        assert_eq!(s.len(), 1);
        assert_eq!(s.tick(5), vec![2]);
    }

    #[test]
    fn wrapping_clock() {
        let mut s = Scheduler::new();
        let now = u32::MAX - 5;
        s.add_event(now, 10, "wrapped");
        assert!(s.tick(u32::MAX).is_empty());
        assert_eq!(s.tick(4), vec!["wrapped"]);
    }

    #[test]
    fn cancel_and_retain() {
        let mut s = Scheduler::new();
        let a = s.add_event(0, 10, 1);
        s.add_event(0, 10, 2);
        s.add_event(0, 10, 3);
        assert!(s.cancel(a));
        assert!(!s.cancel(a));
        s.retain(|p| *p != 3);
        assert_eq!(s.tick(10), vec![2]);
    }

    #[test]
    fn next_due_reports_earliest() {
        let mut s = Scheduler::new();
        assert_eq!(s.next_due(0), None);
        s.add_event(0, 40, ());
        s.add_event(0, 15, ());
        assert_eq!(s.next_due(5), Some(10));
        assert_eq!(s.next_due(20), Some(0));
    }
}
