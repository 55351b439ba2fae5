//! Keyed one-shot timers driven by the simulation tick

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Result of scheduling a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    New,
    /// An outstanding entry for the key was replaced
    Replaced { previous_deadline: u64 },
}

/// One-shot timers, at most one outstanding per key.
///
/// Deadlines are simulation ticks. Entries fire from [`TimerWheel::drain_expired`]
/// in deadline order (ties in scheduling order).
#[derive(Debug, Clone)]
pub struct TimerWheel<K> {
    deadlines: HashMap<K, (u64, u64)>,
    slots: BTreeMap<(u64, u64), K>,
    next_seq: u64,
}

impl<K> TimerWheel<K>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
            slots: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `key` to fire at `deadline`, replacing any outstanding entry
    pub fn schedule(&mut self, key: K, deadline: u64) -> Scheduled {
        let previous = self.remove_entry(&key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deadlines.insert(key, (deadline, seq));
        self.slots.insert((deadline, seq), key);

        match previous {
            Some(previous_deadline) => Scheduled::Replaced { previous_deadline },
            None => Scheduled::New,
        }
    }

    /// Schedule only if nothing is outstanding for `key`. Returns whether it was scheduled.
    pub fn schedule_if_absent(&mut self, key: K, deadline: u64) -> bool {
        if self.deadlines.contains_key(&key) {
            return false;
        }
        self.schedule(key, deadline);
        true
    }

    /// Cancel the outstanding entry for `key`, if any
    pub fn cancel(&mut self, key: &K) -> bool {
        self.remove_entry(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.deadlines.get(key).map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every key whose deadline is at or before `now`
    pub fn drain_expired(&mut self, now: u64) -> Vec<K> {
        let later = self.slots.split_off(&(now.saturating_add(1), 0));
        let fired = std::mem::replace(&mut self.slots, later);

        fired
            .into_values()
            .inspect(|key| {
                self.deadlines.remove(key);
            })
            .collect()
    }

    fn remove_entry(&mut self, key: &K) -> Option<u64> {
        let (deadline, seq) = self.deadlines.remove(key)?;
        self.slots.remove(&(deadline, seq));
        Some(deadline)
    }
}

impl<K> Default for TimerWheel<K>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
