//! Settle-delay stage for filesystem events.
//!
//! Applications often create a file and keep writing or renaming it for a
//! moment afterwards (browsers download into a temp file, then rename it).
//! Acting on the first event would move an incomplete file, so every event is
//! parked here until its settle delay has passed.
//!
//! The queue is a deadline map rather than a sleep: the worker keeps receiving
//! new events while older ones settle and asks [`SettleQueue::next_deadline`]
//! how long it may block. Events are keyed by path; a repeated event for a
//! path that is still pending re-arms its deadline instead of queueing twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Default settle delay in milliseconds.
pub const DEFAULT_SETTLE_MS: u64 = 250;

/// How a file appeared in the watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalKind {
    /// Created in place.
    Created,
    /// Renamed or moved into the directory.
    MovedInto,
}

/// A file waiting to be organized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub path: PathBuf,
    pub kind: ArrivalKind,
}

impl PendingEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ArrivalKind::Created,
        }
    }

    pub fn moved_into(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ArrivalKind::MovedInto,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: ArrivalKind,
    deadline: Instant,
    seq: u64,
}

/// Events waiting out their settle delay.
#[derive(Debug)]
pub struct SettleQueue {
    delay: Duration,
    pending: HashMap<PathBuf, Entry>,
    next_seq: u64,
}

impl SettleQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Parks an event received at `now`.
    ///
    /// If the path is already pending its deadline moves to `now + delay` and
    /// the latest kind wins.
    pub fn push(&mut self, event: PendingEvent, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            event.path,
            Entry {
                kind: event.kind,
                deadline: now + self.delay,
                seq,
            },
        );
    }

    /// Earliest deadline among pending events.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Removes and returns every event whose deadline is at or before `now`,
    /// oldest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<PendingEvent> {
        let mut due: Vec<(PathBuf, Entry)> = Vec::new();
        self.pending.retain(|path, entry| {
            if entry.deadline <= now {
                due.push((path.clone(), *entry));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, entry)| (entry.deadline, entry.seq));
        due.into_iter()
            .map(|(path, entry)| PendingEvent {
                path,
                kind: entry.kind,
            })
            .collect()
    }

    /// Drops everything still pending and returns how many events that was.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(200);

    #[test]
    fn test_event_not_due_before_delay() {
        let mut queue = SettleQueue::new(DELAY);
        let start = Instant::now();
        queue.push(PendingEvent::created("/w/a.png"), start);

        assert!(queue.pop_due(start + Duration::from_millis(199)).is_empty());
        assert_eq!(queue.next_deadline(), Some(start + DELAY));
        assert_eq!(queue.pop_due(start + DELAY), vec![PendingEvent::created("/w/a.png")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeated_event_rearms_deadline() {
        let mut queue = SettleQueue::new(DELAY);
        let start = Instant::now();
        queue.push(PendingEvent::created("/w/a.part"), start);
        queue.push(
            PendingEvent::moved_into("/w/a.part"),
            start + Duration::from_millis(150),
        );

        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(start + DELAY).is_empty());
        let due = queue.pop_due(start + Duration::from_millis(350));
        assert_eq!(due, vec![PendingEvent::moved_into("/w/a.part")]);
    }

    #[test]
    fn test_due_events_come_out_in_arrival_order() {
        let mut queue = SettleQueue::new(DELAY);
        let start = Instant::now();
        queue.push(PendingEvent::created("/w/first"), start);
        queue.push(PendingEvent::created("/w/second"), start);
        queue.push(
            PendingEvent::created("/w/third"),
            start + Duration::from_millis(10),
        );

        let due = queue.pop_due(start + Duration::from_secs(1));
        let names: Vec<_> = due.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("/w/first"),
                PathBuf::from("/w/second"),
                PathBuf::from("/w/third")
            ]
        );
    }

    #[test]
    fn test_slow_event_does_not_hold_back_later_ones() {
        let mut queue = SettleQueue::new(DELAY);
        let start = Instant::now();
        queue.push(PendingEvent::created("/w/early"), start);
        queue.push(
            PendingEvent::created("/w/late"),
            start + Duration::from_millis(100),
        );

        let due = queue.pop_due(start + DELAY);
        assert_eq!(due, vec![PendingEvent::created("/w/early")]);
        assert_eq!(
            queue.next_deadline(),
            Some(start + Duration::from_millis(100) + DELAY)
        );
    }

    #[test]
    fn test_clear_reports_dropped_events() {
        let mut queue = SettleQueue::new(DELAY);
        let now = Instant::now();
        queue.push(PendingEvent::created("/w/a"), now);
        queue.push(PendingEvent::created("/w/b"), now);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.next_deadline(), None);
    }
}
