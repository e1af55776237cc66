// src/stimulation/timer.rs
//! Cancellable one-shot timers owned by the control thread

use std::collections::{BTreeMap, HashMap};

/// Handle of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deadline-ordered set of one-shot timers carrying a payload `K`.
///
/// Timers with equal deadlines fire in the order they were armed.
#[derive(Debug)]
pub struct TimerQueue<K> {
    entries: BTreeMap<(u64, TimerId), K>,
    deadlines: HashMap<TimerId, u64>,
    next_id: u64,
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
        }
    }

    /// Arm a timer firing at `deadline_nanos`
    pub fn schedule_at(&mut self, deadline_nanos: u64, payload: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline_nanos, id), payload);
        self.deadlines.insert(id, deadline_nanos);
        id
    }

    /// Disarm a timer. Returns its payload when it was still armed.
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        let deadline = self.deadlines.remove(&id)?;
        self.entries.remove(&(deadline, id))
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at `now_nanos`
    pub fn pop_due(&mut self, now_nanos: u64) -> Option<(TimerId, K)> {
        let (&(deadline, id), _) = self.entries.iter().next()?;
        if deadline > now_nanos {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries.remove(&(deadline, id)).map(|payload| (id, payload))
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(300, "c");
        queue.schedule_at(100, "a");
        queue.schedule_at(200, "b");
        assert_eq!(queue.next_deadline(), Some(100));

        assert!(queue.pop_due(50).is_none());
        let fired: Vec<&str> = std::iter::from_fn(|| queue.pop_due(1_000).map(|(_, k)| k)).collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_deadlines_keep_arming_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(10, 1);
        queue.schedule_at(10, 2);
        assert_eq!(queue.pop_due(10).map(|(_, k)| k), Some(1));
        assert_eq!(queue.pop_due(10).map(|(_, k)| k), Some(2));
    }

    #[test]
    fn test_cancel() {
        let mut queue = TimerQueue::new();
        let first = queue.schedule_at(10, 'x');
        let second = queue.schedule_at(20, 'y');
        assert!(queue.is_armed(first));

        assert_eq!(queue.cancel(first), Some('x'));
        assert_eq!(queue.cancel(first), None);
        assert_eq!(queue.next_deadline(), Some(20));

        queue.cancel_all();
        assert!(!queue.is_armed(second));
        assert_eq!(queue.next_deadline(), None);
    }
}
